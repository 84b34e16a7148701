use log::{debug, warn};

use super::attrs::{
    ElementContainer, Sda, Sdea, SdfType, ServiceId, ServiceInfo, ATTR_ELEM_CONTAINER, ATTR_SDA,
    ATTR_SDEA, NAN_OUI_TYPE, WFA_OUI,
};
use super::tlv::{TlvReader, TlvWriter};
use super::DecodeError;

/// Public action frame category.
pub const ACTION_CATEGORY_PUBLIC: u8 = 0x04;
/// Vendor-specific public action.
pub const ACTION_VENDOR_SPECIFIC: u8 = 0x09;
/// SDF header: category + action + WFA OUI + NAN OUI type.
pub const SDF_HDR_LEN: usize = 6;

/// Everything needed to build one outgoing SDF.
#[derive(Debug, Clone)]
pub struct SdfSpec<'a> {
    pub subtype: SdfType,
    pub service_id: ServiceId,
    pub instance_id: u8,
    pub requestor_instance_id: u8,
    pub proto_type: u8,
    pub ssi: Option<&'a [u8]>,
    pub elems: Option<&'a [u8]>,
    /// Emit an SDEA even without ssi (publish side always carries one).
    pub with_sdea: bool,
    pub fsd_required: bool,
    pub fsd_with_gas: bool,
}

/// One decoded service descriptor, with its SDEA (matched by embedded
/// instance id) already merged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSda {
    pub subtype: SdfType,
    pub service_id: ServiceId,
    pub instance_id: u8,
    pub requestor_instance_id: u8,
    pub matching_filter: Option<Vec<u8>>,
    pub proto_type: u8,
    pub ssi: Vec<u8>,
    pub fsd_required: bool,
    pub fsd_with_gas: bool,
}

/// Builds a complete SDF: header, SDA, optional SDEA, optional element
/// container.
pub fn build_sdf(spec: &SdfSpec<'_>) -> Vec<u8> {
    let mut w = TlvWriter::with_capacity(
        SDF_HDR_LEN + 16 + spec.ssi.map_or(0, <[u8]>::len) + spec.elems.map_or(0, <[u8]>::len) + 16,
    );
    w.put_u8(ACTION_CATEGORY_PUBLIC);
    w.put_u8(ACTION_VENDOR_SPECIFIC);
    w.put_bytes(&WFA_OUI);
    w.put_u8(NAN_OUI_TYPE);

    let sda = Sda::new(spec.service_id, spec.instance_id, spec.requestor_instance_id, spec.subtype);
    sda.encode(&mut w);

    if spec.with_sdea || spec.ssi.is_some() {
        let sdea = Sdea {
            instance_id: spec.instance_id,
            fsd_required: spec.fsd_required,
            fsd_with_gas: spec.fsd_with_gas,
            service_info: spec.ssi.map(|ssi| ServiceInfo::new(spec.proto_type, ssi)),
            ..Sdea::default()
        };
        sdea.encode(&mut w);
    }

    if let Some(elems) = spec.elems {
        ElementContainer { map_id: 0, elements: elems.to_vec() }.encode(&mut w);
    }

    let frame = w.into_vec();
    #[cfg(feature = "frame-dump")]
    log::trace!("sdf out: {frame:02x?}");
    frame
}

/// Parses a received SDF into per-service descriptors.
///
/// Attribute-level damage is contained: a malformed SDA or SDEA is dropped
/// and the walk continues with the next attribute. Only a frame that is not
/// an SDF at all is reported to the caller.
pub fn parse_sdf(buf: &[u8]) -> Result<Vec<PeerSda>, DecodeError> {
    if buf.len() < SDF_HDR_LEN
        || buf[0] != ACTION_CATEGORY_PUBLIC
        || buf[1] != ACTION_VENDOR_SPECIFIC
        || buf[2..5] != WFA_OUI
        || buf[5] != NAN_OUI_TYPE
    {
        return Err(DecodeError::NotSdf);
    }
    #[cfg(feature = "frame-dump")]
    log::trace!("sdf in: {buf:02x?}");

    let mut sdas: Vec<Sda> = Vec::new();
    let mut sdeas: Vec<Sdea> = Vec::new();

    let mut r = TlvReader::new(&buf[SDF_HDR_LEN..]);
    while r.remaining() >= 3 {
        let Ok(id) = r.u8() else { break };
        let Ok(len) = r.u16_le().map(usize::from) else { break };
        let Ok(value) = r.bytes(len) else {
            // Declared length runs past the buffer; nothing after this point
            // can be framed reliably.
            warn!("sdf: attribute 0x{id:02x} declares {len} bytes with {} left, dropping tail", r.remaining());
            break;
        };
        match id {
            ATTR_SDA => match Sda::decode(value) {
                Ok(sda) => sdas.push(sda),
                Err(e) => debug!("sdf: dropping malformed SDA: {e}"),
            },
            ATTR_SDEA => match Sdea::decode(value) {
                Ok(sdea) => sdeas.push(sdea),
                Err(e) => debug!("sdf: dropping malformed SDEA: {e}"),
            },
            ATTR_ELEM_CONTAINER => {
                if let Err(e) = ElementContainer::decode(value) {
                    debug!("sdf: dropping malformed element container: {e}");
                }
            }
            other => debug!("sdf: ignoring attribute 0x{other:02x} ({len} bytes)"),
        }
    }

    let mut out = Vec::with_capacity(sdas.len());
    for sda in sdas {
        // SDEAs for other instance ids belong to other SDAs in the frame.
        let sdea = sdeas.iter().find(|s| s.instance_id == sda.instance_id);

        // When both the SDA and the SDEA declare service info, the SDEA
        // value wins.
        let info = sdea
            .and_then(|s| s.service_info.as_ref())
            .or(sda.service_info.as_ref());

        out.push(PeerSda {
            subtype: sda.subtype,
            service_id: sda.service_id,
            instance_id: sda.instance_id,
            requestor_instance_id: sda.requestor_instance_id,
            matching_filter: sda.matching_filter.clone(),
            proto_type: info.map_or(0, |i| i.proto_type),
            ssi: info.map_or_else(Vec::new, |i| i.payload.clone()),
            fsd_required: sdea.is_some_and(|s| s.fsd_required),
            fsd_with_gas: sdea.is_some_and(|s| s.fsd_with_gas),
        });
    }
    Ok(out)
}
