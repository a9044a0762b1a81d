//! Replication command bodies: REGISTER_SLAVE, BINLOG_DUMP, BINLOG_DUMP_GTID.
//!
//! These are encoded without the command byte; pass them to
//! [`Framer::write_command`](super::Framer::write_command).

#![allow(clippy::cast_possible_truncation)]

use mywire_core::Result;

use super::{PacketReader, PacketWriter};

/// BINLOG_DUMP flags.
pub mod dump_flags {
    /// Return EOF instead of blocking at the end of the binlog
    pub const NON_BLOCK: u16 = 0x01;
    pub const THROUGH_POSITION: u16 = 0x02;
    /// A GTID set follows in BINLOG_DUMP_GTID
    pub const THROUGH_GTID: u16 = 0x04;
}

/// COM_REGISTER_SLAVE
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterSlave {
    pub server_id: u32,
    pub hostname: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

impl RegisterSlave {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(18 + self.hostname.len());
        writer.write_u32_le(self.server_id);
        write_short_string(&mut writer, &self.hostname);
        write_short_string(&mut writer, &self.user);
        write_short_string(&mut writer, &self.password);
        writer.write_u16_le(self.port);
        // replication rank, master id
        writer.write_u32_le(0);
        writer.write_u32_le(0);
        writer.into_bytes()
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        let server_id = reader.read_u32_le()?;
        let hostname = read_short_string(&mut reader)?;
        let user = read_short_string(&mut reader)?;
        let password = read_short_string(&mut reader)?;
        let port = reader.read_u16_le()?;
        Ok(Self {
            server_id,
            hostname,
            user,
            password,
            port,
        })
    }
}

fn write_short_string(writer: &mut PacketWriter, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(255)];
    writer.write_u8(bytes.len() as u8);
    writer.write_bytes(bytes);
}

fn read_short_string(reader: &mut PacketReader<'_>) -> Result<String> {
    let len = reader.read_u8()?;
    Ok(String::from_utf8_lossy(reader.read_bytes(usize::from(len))?).into_owned())
}

/// COM_BINLOG_DUMP
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinlogDump {
    pub position: u32,
    pub flags: u16,
    pub server_id: u32,
    /// Empty to start from the first available binlog
    pub filename: String,
}

impl BinlogDump {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(10 + self.filename.len());
        writer.write_u32_le(self.position);
        writer.write_u16_le(self.flags);
        writer.write_u32_le(self.server_id);
        writer.write_bytes(self.filename.as_bytes());
        writer.into_bytes()
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        Ok(Self {
            position: reader.read_u32_le()?,
            flags: reader.read_u16_le()?,
            server_id: reader.read_u32_le()?,
            filename: reader.read_rest_string(),
        })
    }
}

/// COM_BINLOG_DUMP_GTID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinlogDumpGtid {
    pub flags: u16,
    pub server_id: u32,
    pub filename: String,
    pub position: u64,
    /// Encoded GTID set; sent when non-empty, which also sets `THROUGH_GTID`
    pub sid_block: Vec<u8>,
}

impl BinlogDumpGtid {
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = self.flags;
        if !self.sid_block.is_empty() {
            flags |= dump_flags::THROUGH_GTID;
        }
        let mut writer = PacketWriter::with_capacity(22 + self.filename.len() + self.sid_block.len());
        writer.write_u16_le(flags);
        writer.write_u32_le(self.server_id);
        writer.write_u32_le(self.filename.len() as u32);
        writer.write_bytes(self.filename.as_bytes());
        writer.write_u64_le(self.position);
        if flags & dump_flags::THROUGH_GTID != 0 {
            writer.write_u32_le(self.sid_block.len() as u32);
            writer.write_bytes(&self.sid_block);
        }
        writer.into_bytes()
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        let flags = reader.read_u16_le()?;
        let server_id = reader.read_u32_le()?;
        let name_len = reader.read_u32_le()? as usize;
        let filename = String::from_utf8_lossy(reader.read_bytes(name_len)?).into_owned();
        let position = reader.read_u64_le()?;
        let sid_block = if flags & dump_flags::THROUGH_GTID != 0 {
            let len = reader.read_u32_le()? as usize;
            reader.read_bytes(len)?.to_vec()
        } else {
            Vec::new()
        };
        Ok(Self {
            flags,
            server_id,
            filename,
            position,
            sid_block,
        })
    }
}
