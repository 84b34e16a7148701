use sha2::{Digest, Sha256};

use super::tlv::{TlvReader, TlvWriter};
use super::DecodeError;

/// NAN attribute ids carried in a Service Discovery Frame.
pub const ATTR_SDA: u8 = 0x03;
pub const ATTR_SDEA: u8 = 0x0E;
pub const ATTR_ELEM_CONTAINER: u8 = 0x14;

/// Wi-Fi Alliance OUI used in the SDF header and in service info fields.
pub const WFA_OUI: [u8; 3] = [0x50, 0x6F, 0x9A];
/// OUI type selecting the NAN Service Discovery Frame.
pub const NAN_OUI_TYPE: u8 = 0x13;

/// SDA service control: low two bits carry the frame subtype, the higher
/// bits flag optional fields appearing in this order.
pub const SDA_CTRL_TYPE_MASK: u8 = 0x03;
pub const SDA_CTRL_BINDING_BITMAP: u8 = 1 << 2;
pub const SDA_CTRL_MATCHING_FILTER: u8 = 1 << 3;
pub const SDA_CTRL_RESPONSE_FILTER: u8 = 1 << 4;
pub const SDA_CTRL_SERVICE_INFO: u8 = 1 << 5;

/// SDEA control bit flags (16-bit little-endian field).
pub const SDEA_CTRL_FSD_REQUIRED: u16 = 1 << 0;
pub const SDEA_CTRL_FSD_WITH_GAS: u16 = 1 << 1;
pub const SDEA_CTRL_DATA_PATH_REQUIRED: u16 = 1 << 2;
pub const SDEA_CTRL_RANGING_REQUIRED: u16 = 1 << 3;
pub const SDEA_CTRL_RANGE_LIMIT: u16 = 1 << 4;
pub const SDEA_CTRL_SERVICE_UPDATE_INDICATOR: u16 = 1 << 5;

/// 6-byte NAN service id derived from the service name.
///
/// Deterministic and case-insensitive; distinct names are not guaranteed
/// to produce distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub [u8; 6]);

impl ServiceId {
    /// SHA-256 of the lowercased name, truncated to 6 bytes.
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.to_lowercase().as_bytes());
        let mut id = [0u8; 6];
        id.copy_from_slice(&digest[..6]);
        ServiceId(id)
    }
}

/// SDF subtype carried in the SDA service control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SdfType {
    Publish = 0,
    Subscribe = 1,
    FollowUp = 2,
}

impl TryFrom<u8> for SdfType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(SdfType::Publish),
            1 => Ok(SdfType::Subscribe),
            2 => Ok(SdfType::FollowUp),
            other => Err(DecodeError::UnknownSubtype(other)),
        }
    }
}

/// Service info field: 3-byte OUI, application protocol tag, payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub oui: [u8; 3],
    pub proto_type: u8,
    pub payload: Vec<u8>,
}

impl ServiceInfo {
    pub fn new(proto_type: u8, payload: &[u8]) -> Self {
        ServiceInfo { oui: WFA_OUI, proto_type, payload: payload.to_vec() }
    }
}

/// Service Descriptor Attribute (0x03).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sda {
    pub service_id: ServiceId,
    pub instance_id: u8,
    pub requestor_instance_id: u8,
    pub subtype: SdfType,
    pub binding_bitmap: Option<u16>,
    pub matching_filter: Option<Vec<u8>>,
    pub response_filter: Option<Vec<u8>>,
    pub service_info: Option<ServiceInfo>,
}

impl Sda {
    pub fn new(service_id: ServiceId, instance_id: u8, requestor_instance_id: u8, subtype: SdfType) -> Self {
        Sda {
            service_id,
            instance_id,
            requestor_instance_id,
            subtype,
            binding_bitmap: None,
            matching_filter: None,
            response_filter: None,
            service_info: None,
        }
    }

    pub fn encode(&self, w: &mut TlvWriter) {
        let attr = w.begin_attr(ATTR_SDA);
        w.put_bytes(&self.service_id.0);
        w.put_u8(self.instance_id);
        w.put_u8(self.requestor_instance_id);

        let mut ctrl = self.subtype as u8;
        if self.binding_bitmap.is_some() {
            ctrl |= SDA_CTRL_BINDING_BITMAP;
        }
        if self.matching_filter.is_some() {
            ctrl |= SDA_CTRL_MATCHING_FILTER;
        }
        if self.response_filter.is_some() {
            ctrl |= SDA_CTRL_RESPONSE_FILTER;
        }
        if self.service_info.is_some() {
            ctrl |= SDA_CTRL_SERVICE_INFO;
        }
        w.put_u8(ctrl);

        if let Some(bitmap) = self.binding_bitmap {
            w.put_u16_le(bitmap);
        }
        if let Some(filter) = &self.matching_filter {
            w.put_u8(filter.len() as u8);
            w.put_bytes(filter);
        }
        if let Some(filter) = &self.response_filter {
            w.put_u8(filter.len() as u8);
            w.put_bytes(filter);
        }
        if let Some(info) = &self.service_info {
            w.put_u8((3 + 1 + info.payload.len()) as u8);
            w.put_bytes(&info.oui);
            w.put_u8(info.proto_type);
            w.put_bytes(&info.payload);
        }
        w.end_attr(attr);
    }

    /// Decodes an SDA attribute value. Optional fields are read strictly in
    /// control-bit order; any declared length running past the value is a
    /// decode error and drops the whole SDA.
    pub fn decode(value: &[u8]) -> Result<Sda, DecodeError> {
        let mut r = TlvReader::new(value);
        let mut service_id = [0u8; 6];
        service_id.copy_from_slice(r.bytes(6)?);
        let instance_id = r.u8()?;
        let requestor_instance_id = r.u8()?;
        let ctrl = r.u8()?;
        let subtype = SdfType::try_from(ctrl & SDA_CTRL_TYPE_MASK)?;

        let binding_bitmap = if ctrl & SDA_CTRL_BINDING_BITMAP != 0 {
            Some(r.u16_le()?)
        } else {
            None
        };
        let matching_filter = if ctrl & SDA_CTRL_MATCHING_FILTER != 0 {
            let len = r.u8()? as usize;
            Some(r.bytes(len)?.to_vec())
        } else {
            None
        };
        let response_filter = if ctrl & SDA_CTRL_RESPONSE_FILTER != 0 {
            let len = r.u8()? as usize;
            Some(r.bytes(len)?.to_vec())
        } else {
            None
        };
        let service_info = if ctrl & SDA_CTRL_SERVICE_INFO != 0 {
            let len = r.u8()? as usize;
            Some(decode_service_info(r.take(len)?)?)
        } else {
            None
        };

        Ok(Sda {
            service_id: ServiceId(service_id),
            instance_id,
            requestor_instance_id,
            subtype,
            binding_bitmap,
            matching_filter,
            response_filter,
            service_info,
        })
    }
}

/// Service Descriptor Extension Attribute (0x0E).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sdea {
    pub instance_id: u8,
    pub fsd_required: bool,
    pub fsd_with_gas: bool,
    pub data_path_required: bool,
    pub ranging_required: bool,
    pub range_limit: Option<[u8; 4]>,
    pub service_update_indicator: Option<u8>,
    pub service_info: Option<ServiceInfo>,
}

impl Sdea {
    pub fn encode(&self, w: &mut TlvWriter) {
        let attr = w.begin_attr(ATTR_SDEA);
        w.put_u8(self.instance_id);

        let mut ctrl = 0u16;
        if self.fsd_required {
            ctrl |= SDEA_CTRL_FSD_REQUIRED;
        }
        if self.fsd_with_gas {
            ctrl |= SDEA_CTRL_FSD_WITH_GAS;
        }
        if self.data_path_required {
            ctrl |= SDEA_CTRL_DATA_PATH_REQUIRED;
        }
        if self.ranging_required {
            ctrl |= SDEA_CTRL_RANGING_REQUIRED;
        }
        if self.range_limit.is_some() {
            ctrl |= SDEA_CTRL_RANGE_LIMIT;
        }
        if self.service_update_indicator.is_some() {
            ctrl |= SDEA_CTRL_SERVICE_UPDATE_INDICATOR;
        }
        w.put_u16_le(ctrl);

        if let Some(limit) = self.range_limit {
            w.put_bytes(&limit);
        }
        if let Some(sui) = self.service_update_indicator {
            w.put_u8(sui);
        }
        if let Some(info) = &self.service_info {
            w.put_u16_le((3 + 1 + info.payload.len()) as u16);
            w.put_bytes(&info.oui);
            w.put_u8(info.proto_type);
            w.put_bytes(&info.payload);
        }
        w.end_attr(attr);
    }

    pub fn decode(value: &[u8]) -> Result<Sdea, DecodeError> {
        let mut r = TlvReader::new(value);
        let instance_id = r.u8()?;
        let ctrl = r.u16_le()?;

        let range_limit = if ctrl & SDEA_CTRL_RANGE_LIMIT != 0 {
            let b = r.bytes(4)?;
            Some([b[0], b[1], b[2], b[3]])
        } else {
            None
        };
        let service_update_indicator = if ctrl & SDEA_CTRL_SERVICE_UPDATE_INDICATOR != 0 {
            Some(r.u8()?)
        } else {
            None
        };
        // Service info is present whenever bytes remain after the fixed
        // fields; there is no control bit for it.
        let service_info = if r.remaining() >= 2 {
            let len = r.u16_le()? as usize;
            Some(decode_service_info(r.take(len)?)?)
        } else {
            None
        };

        Ok(Sdea {
            instance_id,
            fsd_required: ctrl & SDEA_CTRL_FSD_REQUIRED != 0,
            fsd_with_gas: ctrl & SDEA_CTRL_FSD_WITH_GAS != 0,
            data_path_required: ctrl & SDEA_CTRL_DATA_PATH_REQUIRED != 0,
            ranging_required: ctrl & SDEA_CTRL_RANGING_REQUIRED != 0,
            range_limit,
            service_update_indicator,
            service_info,
        })
    }
}

fn decode_service_info(mut r: TlvReader<'_>) -> Result<ServiceInfo, DecodeError> {
    let oui_bytes = r.bytes(3)?;
    let proto_type = r.u8()?;
    Ok(ServiceInfo {
        oui: [oui_bytes[0], oui_bytes[1], oui_bytes[2]],
        proto_type,
        payload: r.rest().to_vec(),
    })
}

/// Element Container attribute (0x14): out-of-band application elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementContainer {
    pub map_id: u8,
    pub elements: Vec<u8>,
}

impl ElementContainer {
    pub fn encode(&self, w: &mut TlvWriter) {
        let attr = w.begin_attr(ATTR_ELEM_CONTAINER);
        w.put_u8(self.map_id);
        w.put_bytes(&self.elements);
        w.end_attr(attr);
    }

    pub fn decode(value: &[u8]) -> Result<ElementContainer, DecodeError> {
        let mut r = TlvReader::new(value);
        let map_id = r.u8()?;
        Ok(ElementContainer { map_id, elements: r.rest().to_vec() })
    }
}
