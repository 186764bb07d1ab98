//! BER-TLV helpers shared by the protocol handlers

use bytes::Bytes;
use iso7816_tlv::ber::{Tag, Tlv, Value};

use crate::{Error, Result, constants::tags};

/// Whether the object carries the given one-byte tag
pub(crate) fn has_tag(tlv: &Tlv, tag: &[u8]) -> bool {
    tlv.tag().to_bytes() == tag
}

/// The value of a primitive object
pub(crate) fn primitive(tlv: &Tlv) -> Result<&[u8]> {
    match tlv.value() {
        Value::Primitive(bytes) => Ok(bytes.as_slice()),
        Value::Constructed(_) => Err(Error::IncorrectParameters),
    }
}

/// The children of a constructed object
pub(crate) fn constructed(tlv: &Tlv) -> Result<&[Tlv]> {
    match tlv.value() {
        Value::Constructed(tlvs) => Ok(tlvs),
        Value::Primitive(_) => Err(Error::IncorrectParameters),
    }
}

/// First child with the given tag
pub(crate) fn find<'a>(tlvs: &'a [Tlv], tag: &[u8]) -> Option<&'a Tlv> {
    tlvs.iter().find(|tlv| has_tag(tlv, tag))
}

/// Parse a concatenation of data objects
pub(crate) fn parse_objects(mut input: &[u8]) -> Result<Vec<Tlv>> {
    let mut objects = Vec::new();
    while !input.is_empty() {
        let (tlv, rest) = Tlv::parse(input);
        objects.push(tlv?);
        input = rest;
    }
    Ok(objects)
}

/// Parse a concatenation of data objects, keeping the encoding of each
pub(crate) fn parse_raw_objects(mut input: &[u8]) -> Result<Vec<(Tlv, &[u8])>> {
    let mut objects = Vec::new();
    while !input.is_empty() {
        let (tlv, rest) = Tlv::parse(input);
        objects.push((tlv?, &input[..input.len() - rest.len()]));
        input = rest;
    }
    Ok(objects)
}

/// Encode a primitive data object
pub(crate) fn encode(tag: u8, value: &[u8]) -> Result<Vec<u8>> {
    Ok(Tlv::new(Tag::try_from(tag)?, Value::Primitive(value.to_vec()))?.to_vec())
}

/// Encode a data object around already encoded content
pub(crate) fn wrap(tag: &[u8], content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(tag.len() + 4 + content.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(&encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

/// BER definite length
pub(crate) fn encode_length(len: usize) -> Vec<u8> {
    match len {
        0..=0x7F => vec![len as u8],
        0x80..=0xFF => vec![0x81, len as u8],
        0x100..=0xFFFF => vec![0x82, (len >> 8) as u8, len as u8],
        _ => vec![0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8],
    }
}

/// Unwrap the dynamic authentication data (tag 0x7C) of GENERAL AUTHENTICATE
///
/// An empty command body yields no objects.
pub(crate) fn unpack_dynamic_authentication_data(data: &[u8]) -> Result<Vec<Tlv>> {
    let mut objects = Vec::new();
    for tlv in parse_objects(data)? {
        if !has_tag(&tlv, &[tags::DYNAMIC_AUTHENTICATION_DATA]) {
            return Err(Error::IncorrectParameters);
        }
        objects = constructed(&tlv)?.to_vec();
    }
    Ok(objects)
}

/// Wrap primitive objects into dynamic authentication data
pub(crate) fn pack_dynamic_authentication_data(objects: &[(u8, &[u8])]) -> Result<Bytes> {
    let mut content = Vec::new();
    for (tag, value) in objects {
        content.extend(encode(*tag, value)?);
    }
    Ok(wrap(&[tags::DYNAMIC_AUTHENTICATION_DATA], &content).into())
}

/// The value of the only object, which must carry `tag`
pub(crate) fn single_object(objects: &[Tlv], tag: u8) -> Result<Bytes> {
    match objects {
        [tlv] if has_tag(tlv, &[tag]) => Ok(Bytes::copy_from_slice(primitive(tlv)?)),
        _ => Err(Error::IncorrectParameters),
    }
}

/// Values of the objects in a dynamic authentication data response, by tag
pub(crate) fn dynamic_authentication_data(response: &[u8]) -> Result<Vec<(u8, Bytes)>> {
    unpack_dynamic_authentication_data(response)?
        .iter()
        .map(|tlv| match tlv.tag().to_bytes() {
            [tag] => Ok((*tag, Bytes::copy_from_slice(primitive(tlv)?))),
            _ => Err(Error::IncorrectParameters),
        })
        .collect()
}
