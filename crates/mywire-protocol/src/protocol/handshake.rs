//! Connection-phase packets.
//!
//! ```text
//! server                              client
//!   HandshakeV10            ------>
//!                           <------   SSLRequest (optional, then TLS)
//!                           <------   HandshakeResponse41
//!   AuthSwitchRequest /     ------>
//!   AuthMoreData (0..n)     <------   auth data
//!   OK | ERR                ------>
//! ```

#![allow(clippy::cast_possible_truncation)]

use mywire_core::error::{EncodingErrorKind, ProtocolErrorKind};
use mywire_core::{Error, Result};

use super::capabilities::{
    CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH,
    CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA, CLIENT_SECURE_CONNECTION, CLIENT_SSL,
};
use super::response::ErrPacket;
use super::writer::lenenc_int_len;
use super::{PacketReader, PacketWriter};

/// Protocol version carried by every modern server greeting.
pub const PROTOCOL_VERSION: u8 = 10;
/// Size of an SSLRequest payload.
pub const SSL_REQUEST_LEN: usize = 32;

/// Initial server greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeV10 {
    pub server_version: String,
    pub connection_id: u32,
    /// Salt (salt-1 followed by salt-2 without its NUL)
    pub auth_plugin_data: Vec<u8>,
    pub capabilities: u32,
    pub collation: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl HandshakeV10 {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let protocol_version = reader.read_u8()?;
        if protocol_version == 0xFF {
            return Err(ErrPacket::parse(payload)?.into_error());
        }
        if protocol_version != PROTOCOL_VERSION {
            return Err(Error::protocol(
                ProtocolErrorKind::UnsupportedCapability,
                format!("unsupported handshake protocol version {protocol_version}"),
            ));
        }

        let server_version = reader.read_null_string()?;
        let connection_id = reader.read_u32_le()?;
        let mut auth_plugin_data = reader.read_bytes(8)?.to_vec();
        reader.skip(1)?;
        let mut capabilities = u32::from(reader.read_u16_le()?);

        let mut collation = 0;
        let mut status_flags = 0;
        let mut auth_plugin_name = String::new();

        if !reader.is_empty() {
            collation = reader.read_u8()?;
            status_flags = reader.read_u16_le()?;
            capabilities |= u32::from(reader.read_u16_le()?) << 16;
            let auth_data_len = reader.read_u8()?;
            reader.skip(10)?;

            if capabilities & CLIENT_SECURE_CONNECTION != 0 {
                let salt2_len = (usize::from(auth_data_len).saturating_sub(8)).max(13);
                let salt2 = reader.read_bytes(salt2_len.min(reader.remaining()))?;
                let salt2 = salt2.strip_suffix(&[0]).unwrap_or(salt2);
                auth_plugin_data.extend_from_slice(salt2);
            }

            if capabilities & CLIENT_PLUGIN_AUTH != 0 {
                auth_plugin_name = reader.read_null_string_or_rest();
            }
        }

        Ok(Self {
            server_version,
            connection_id,
            auth_plugin_data,
            capabilities,
            collation,
            status_flags,
            auth_plugin_name,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(128);
        writer.write_u8(PROTOCOL_VERSION);
        writer.write_null_string(&self.server_version);
        writer.write_u32_le(self.connection_id);

        let (salt1, salt2) = self
            .auth_plugin_data
            .split_at(self.auth_plugin_data.len().min(8));
        writer.write_bytes(salt1);
        writer.write_zeros(8 - salt1.len());
        writer.write_u8(0);
        writer.write_u16_le((self.capabilities & 0xFFFF) as u16);
        writer.write_u8(self.collation);
        writer.write_u16_le(self.status_flags);
        writer.write_u16_le((self.capabilities >> 16) as u16);
        if self.capabilities & CLIENT_PLUGIN_AUTH != 0 {
            writer.write_u8((self.auth_plugin_data.len() + 1) as u8);
        } else {
            writer.write_u8(0);
        }
        writer.write_zeros(10);
        if self.capabilities & CLIENT_SECURE_CONNECTION != 0 {
            // salt-2 is at least 13 bytes including its NUL
            writer.write_bytes(salt2);
            writer.write_zeros(13usize.saturating_sub(salt2.len()).max(1));
        }
        if self.capabilities & CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(&self.auth_plugin_name);
        }
        writer.into_bytes()
    }
}

/// SSLRequest: the truncated HandshakeResponse sent before TLS starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SslRequest {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub collation: u8,
}

impl SslRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(SSL_REQUEST_LEN);
        writer.write_u32_le(self.capabilities | CLIENT_SSL);
        writer.write_u32_le(self.max_packet_size);
        writer.write_u8(self.collation);
        writer.write_zeros(23);
        writer.into_bytes()
    }

    /// Recognize an SSLRequest among client handshake packets.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != SSL_REQUEST_LEN {
            return None;
        }
        let mut reader = PacketReader::new(payload);
        let capabilities = reader.read_u32_le().ok()?;
        if capabilities & CLIENT_SSL == 0 {
            return None;
        }
        Some(Self {
            capabilities,
            max_packet_size: reader.read_u32_le().ok()?,
            collation: reader.read_u8().ok()?,
        })
    }
}

/// Client reply to the server greeting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeResponse41 {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub collation: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
    pub connect_attrs: Vec<(String, String)>,
}

impl HandshakeResponse41 {
    /// Encode using `self.capabilities`, which must already be negotiated.
    pub fn encode(&self) -> Vec<u8> {
        let caps = self.capabilities;
        let mut writer = PacketWriter::with_capacity(128);
        writer.write_u32_le(caps);
        writer.write_u32_le(self.max_packet_size);
        writer.write_u8(self.collation);
        writer.write_zeros(23);
        writer.write_null_string(&self.username);

        if caps & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(&self.auth_response);
        } else if caps & CLIENT_SECURE_CONNECTION != 0 {
            writer.write_u8(self.auth_response.len().min(255) as u8);
            writer.write_bytes(&self.auth_response[..self.auth_response.len().min(255)]);
        } else {
            writer.write_null_bytes(&self.auth_response);
        }

        if caps & CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(self.database.as_deref().unwrap_or(""));
        }
        if caps & CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(self.auth_plugin_name.as_deref().unwrap_or(""));
        }
        if caps & CLIENT_CONNECT_ATTRS != 0 {
            let total: usize = self
                .connect_attrs
                .iter()
                .map(|(k, v)| {
                    lenenc_int_len(k.len() as u64) + k.len() + lenenc_int_len(v.len() as u64) + v.len()
                })
                .sum();
            writer.write_lenenc_int(total as u64);
            for (key, value) in &self.connect_attrs {
                writer.write_lenenc_string(key);
                writer.write_lenenc_string(value);
            }
        }
        writer.into_bytes()
    }

    /// Decode a client response; field presence follows the client's own flags.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let capabilities = reader.read_u32_le()?;
        let max_packet_size = reader.read_u32_le()?;
        let collation = reader.read_u8()?;
        reader.skip(23)?;
        let username = reader.read_null_string()?;

        let auth_response = if capabilities & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            reader.read_lenenc_bytes()?.to_vec()
        } else if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            let len = reader.read_u8()?;
            reader.read_bytes(usize::from(len))?.to_vec()
        } else {
            reader.read_null_bytes()?.to_vec()
        };

        let database = if capabilities & CLIENT_CONNECT_WITH_DB != 0 && !reader.is_empty() {
            Some(reader.read_null_string_or_rest()).filter(|db| !db.is_empty())
        } else {
            None
        };
        let auth_plugin_name = if capabilities & CLIENT_PLUGIN_AUTH != 0 && !reader.is_empty() {
            Some(reader.read_null_string_or_rest())
        } else {
            None
        };

        let mut connect_attrs = Vec::new();
        if capabilities & CLIENT_CONNECT_ATTRS != 0 && !reader.is_empty() {
            let total = usize::try_from(reader.read_lenenc_int()?).map_err(|_| {
                Error::encoding(EncodingErrorKind::InvalidLenEnc, "attribute block too large")
            })?;
            let block = reader.read_bytes(total)?;
            let mut attrs = PacketReader::new(block);
            while !attrs.is_empty() {
                let key = attrs.read_lenenc_string()?;
                let value = attrs.read_lenenc_string()?;
                connect_attrs.push((key, value));
            }
        }

        Ok(Self {
            capabilities,
            max_packet_size,
            collation,
            username,
            auth_response,
            database,
            auth_plugin_name,
            connect_attrs,
        })
    }
}

/// Server request to restart authentication with another plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub plugin_data: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let header = reader.read_u8()?;
        if header != 0xFE {
            return Err(Error::encoding(
                EncodingErrorKind::UnexpectedFirstByte,
                format!("auth switch starts with 0x{header:02X}"),
            ));
        }
        let plugin_name = reader.read_null_string_or_rest();
        Ok(Self {
            plugin_name,
            plugin_data: reader.read_rest().to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(0xFE);
        writer.write_null_string(&self.plugin_name);
        writer.write_bytes(&self.plugin_data);
        writer.into_bytes()
    }
}

/// Wrap plugin data in an AuthMoreData packet (0x01 prefix).
pub fn encode_auth_more_data(data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(data.len() + 1);
    payload.push(0x01);
    payload.extend_from_slice(data);
    payload
}

/// Strip the AuthMoreData prefix.
pub fn parse_auth_more_data(payload: &[u8]) -> Result<&[u8]> {
    match payload.split_first() {
        Some((0x01, data)) => Ok(data),
        _ => Err(Error::unexpected_packet("expected AuthMoreData", payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities::{CLIENT_PROTOCOL_41, DEFAULT_SERVER_FLAGS};

    fn sample_greeting() -> HandshakeV10 {
        HandshakeV10 {
            server_version: "8.0.36-mywire".to_string(),
            connection_id: 42,
            auth_plugin_data: (1..=20).collect(),
            capabilities: DEFAULT_SERVER_FLAGS,
            collation: 255,
            status_flags: 2,
            auth_plugin_name: "caching_sha2_password".to_string(),
        }
    }

    #[test]
    fn test_greeting_layout() {
        let bytes = sample_greeting().encode();
        assert_eq!(bytes[0], 10);
        let after_version = 1 + "8.0.36-mywire".len() + 1;
        assert_eq!(&bytes[after_version..after_version + 4], &[42, 0, 0, 0]);
        assert_eq!(&bytes[after_version + 4..after_version + 12], &[1, 2, 3, 4, 5, 6, 7, 8]);
        // auth-plugin-data length: 20 salt bytes + NUL
        assert_eq!(bytes[after_version + 12 + 1 + 2 + 1 + 2 + 2], 21);
        assert!(bytes.ends_with(b"caching_sha2_password\0"));

        let parsed = HandshakeV10::parse(&bytes).unwrap();
        assert_eq!(parsed, sample_greeting());
    }

    #[test]
    fn test_greeting_error_packet() {
        let err = HandshakeV10::parse(b"\xFF\x69\x04Host is blocked").unwrap_err();
        assert_eq!(err.error_code(), Some(1129));
    }

    #[test]
    fn test_greeting_plugin_name_without_nul() {
        let mut bytes = sample_greeting().encode();
        bytes.pop();
        let parsed = HandshakeV10::parse(&bytes).unwrap();
        assert_eq!(parsed.auth_plugin_name, "caching_sha2_password");
    }

    #[test]
    fn test_ssl_request() {
        let req = SslRequest {
            capabilities: CLIENT_PROTOCOL_41,
            max_packet_size: 16 * 1024 * 1024,
            collation: 255,
        };
        let bytes = req.encode();
        assert_eq!(bytes.len(), SSL_REQUEST_LEN);
        let parsed = SslRequest::parse(&bytes).unwrap();
        assert_eq!(parsed.capabilities, CLIENT_PROTOCOL_41 | CLIENT_SSL);
        assert_eq!(parsed.collation, 255);
        assert!(SslRequest::parse(&bytes[..31]).is_none());
    }

    #[test]
    fn test_response_auth_encodings() {
        let mut resp = HandshakeResponse41 {
            capabilities: CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION,
            max_packet_size: 1 << 24,
            collation: 255,
            username: "root".to_string(),
            auth_response: vec![0xAA; 20],
            ..HandshakeResponse41::default()
        };
        let bytes = resp.encode();
        assert_eq!(bytes[32..37], *b"root\0");
        assert_eq!(bytes[37], 20);
        assert_eq!(HandshakeResponse41::parse(&bytes).unwrap(), resp);

        resp.capabilities = CLIENT_PROTOCOL_41;
        resp.auth_response = b"pw".to_vec();
        let bytes = resp.encode();
        assert!(bytes.ends_with(b"root\0pw\0"));
        assert_eq!(HandshakeResponse41::parse(&bytes).unwrap(), resp);
    }

    #[test]
    fn test_response_full_featured() {
        let resp = HandshakeResponse41 {
            capabilities: CLIENT_PROTOCOL_41
                | CLIENT_SECURE_CONNECTION
                | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
                | CLIENT_CONNECT_WITH_DB
                | CLIENT_PLUGIN_AUTH
                | CLIENT_CONNECT_ATTRS,
            max_packet_size: 1 << 24,
            collation: 255,
            username: "app".to_string(),
            auth_response: vec![7; 32],
            database: Some("shop".to_string()),
            auth_plugin_name: Some("caching_sha2_password".to_string()),
            connect_attrs: vec![
                ("_client_name".to_string(), "mywire".to_string()),
                ("_os".to_string(), "linux".to_string()),
            ],
        };
        let bytes = resp.encode();
        assert_eq!(HandshakeResponse41::parse(&bytes).unwrap(), resp);
    }

    #[test]
    fn test_auth_switch_and_more_data() {
        let switch = AuthSwitchRequest {
            plugin_name: "mysql_native_password".to_string(),
            plugin_data: vec![9; 21],
        };
        assert_eq!(AuthSwitchRequest::parse(&switch.encode()).unwrap(), switch);

        let more = encode_auth_more_data(&[0x03]);
        assert_eq!(parse_auth_more_data(&more).unwrap(), &[0x03]);
        assert!(parse_auth_more_data(&[0x00]).is_err());
    }
}
