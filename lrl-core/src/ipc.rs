// Length prefixed bincode frames: a 4 byte big endian payload length followed by the payload.

use crate::error::Error;
use anyhow::Result;
use bincode::{Decode, Encode, error::DecodeError};
use interprocess::local_socket::Stream;
use std::io::{BufReader, Read, Write};

pub type Connection = BufReader<Stream>;

pub fn encode_frame<P: Encode>(packet: P) -> Result<Vec<u8>> {
    let payload = bincode::encode_to_vec(packet, bincode::config::standard())?;
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode_payload<P: Decode<()>>(payload: &[u8]) -> Result<P> {
    match bincode::decode_from_slice(payload, bincode::config::standard()) {
        Ok((packet, _)) => Ok(packet),
        Err(DecodeError::UnexpectedVariant {
            type_name, found, ..
        }) => Err(Error::ProtocolDesync {
            tag: format!("unknown {type_name} tag {found}"),
        }
        .into()),
        Err(err) => Err(err.into()),
    }
}

pub fn write_packet<W: Write, P: Encode>(writer: &mut W, packet: P) -> Result<()> {
    writer.write_all(&encode_frame(packet)?)?;
    writer.flush()?;
    Ok(())
}

pub fn read_packet<R: Read, P: Decode<()>>(reader: &mut R) -> Result<P> {
    let mut content_len = [0u8; 4];
    reader.read_exact(&mut content_len)?;
    let len = u32::from_be_bytes(content_len);
    let mut buffer = vec![0u8; len as usize];
    reader.read_exact(&mut buffer)?;
    decode_payload(&buffer)
}

pub fn send_packet<P: Encode>(conn: &mut Connection, packet: P) -> Result<()> {
    write_packet(conn.get_mut(), packet)
}

pub fn receive_packet<P: Decode<()>>(conn: &mut Connection) -> Result<P> {
    read_packet(conn)
}
