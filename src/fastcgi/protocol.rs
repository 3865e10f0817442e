//! FastCGI 1.0 record codec
//!
//! Every record starts with an 8 byte header:
//!
//! ```text
//! version(1) type(1) requestId(2, BE) contentLength(2, BE) paddingLength(1) reserved(1)
//! ```
//!
//! followed by `contentLength` bytes of content and `paddingLength` bytes of
//! padding. Records written by this module are padded to a multiple of 8 bytes.

use crate::error::{AppResult, SensorError};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// The only protocol version in existence
pub const FCGI_VERSION_1: u8 = 1;
/// Size of a record header
pub const HEADER_LEN: usize = 8;
/// Largest content a single record can carry
pub const MAX_CONTENT_LEN: usize = 0xffff;
/// Request id used by management records
pub const NULL_REQUEST_ID: u16 = 0;
/// `FCGI_BEGIN_REQUEST` flag: keep the connection open after the response
pub const FCGI_KEEP_CONN: u8 = 1;

/// Management variable: maximum concurrent connections
pub const FCGI_MAX_CONNS: &str = "FCGI_MAX_CONNS";
/// Management variable: maximum concurrent requests
pub const FCGI_MAX_REQS: &str = "FCGI_MAX_REQS";
/// Management variable: whether connections are multiplexed
pub const FCGI_MPXS_CONNS: &str = "FCGI_MPXS_CONNS";

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl RecordType {
    /// Map a wire value to a known record type
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::BeginRequest),
            2 => Some(RecordType::AbortRequest),
            3 => Some(RecordType::EndRequest),
            4 => Some(RecordType::Params),
            5 => Some(RecordType::Stdin),
            6 => Some(RecordType::Stdout),
            7 => Some(RecordType::Stderr),
            8 => Some(RecordType::Data),
            9 => Some(RecordType::GetValues),
            10 => Some(RecordType::GetValuesResult),
            11 => Some(RecordType::UnknownType),
            _ => None,
        }
    }
}

/// Role requested in `FCGI_BEGIN_REQUEST`. Only `Responder` is served.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Role {
    Responder = 1,
    Authorizer = 2,
    Filter = 3,
}

impl Role {
    /// Map a wire value to a known role
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Role::Responder),
            2 => Some(Role::Authorizer),
            3 => Some(Role::Filter),
            _ => None,
        }
    }
}

/// `protocolStatus` of `FCGI_END_REQUEST`
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolStatus {
    RequestComplete = 0,
    CantMpxConn = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

impl ProtocolStatus {
    /// Map a wire value to a known status
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ProtocolStatus::RequestComplete),
            1 => Some(ProtocolStatus::CantMpxConn),
            2 => Some(ProtocolStatus::Overloaded),
            3 => Some(ProtocolStatus::UnknownRole),
            _ => None,
        }
    }
}

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version, always [`FCGI_VERSION_1`]
    pub version: u8,
    /// Raw record type, kept raw so unknown types can be echoed back
    pub record_type: u8,
    /// Request the record belongs to, 0 for management records
    pub request_id: u16,
    /// Bytes of content following the header
    pub content_length: u16,
    /// Bytes of padding following the content
    pub padding_length: u8,
}

impl Header {
    /// Decode from the first [`HEADER_LEN`] bytes of `data`
    pub fn decode(data: &[u8]) -> AppResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(SensorError::Protocol(
                "Insufficient data for record header".to_string(),
            ));
        }
        let header = Header {
            version: data[0],
            record_type: data[1],
            request_id: u16::from_be_bytes([data[2], data[3]]),
            content_length: u16::from_be_bytes([data[4], data[5]]),
            padding_length: data[6],
        };
        if header.version != FCGI_VERSION_1 {
            return Err(SensorError::Protocol(format!(
                "Unsupported FastCGI version {}",
                header.version
            )));
        }
        Ok(header)
    }

    /// Append the encoded header to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.record_type);
        buf.put_u16(self.request_id);
        buf.put_u16(self.content_length);
        buf.put_u8(self.padding_length);
        buf.put_u8(0);
    }
}

/// One complete record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Raw record type
    pub record_type: u8,
    /// Request id
    pub request_id: u16,
    /// Record content without padding
    pub content: Vec<u8>,
}

impl Record {
    /// Build a record of a known type
    pub fn new(record_type: RecordType, request_id: u16, content: Vec<u8>) -> Self {
        Self {
            record_type: record_type as u8,
            request_id,
            content,
        }
    }

    /// Known record type, if any
    pub fn kind(&self) -> Option<RecordType> {
        RecordType::from_u8(self.record_type)
    }

    /// True for management records (request id 0)
    pub fn is_management(&self) -> bool {
        self.request_id == NULL_REQUEST_ID
    }

    /// Append the encoded record, padded to an 8 byte boundary, to `buf`.
    ///
    /// Content longer than [`MAX_CONTENT_LEN`] is rejected; use
    /// [`encode_stream`] to split large payloads.
    pub fn encode(&self, buf: &mut BytesMut) -> AppResult<()> {
        let content_length = u16::try_from(self.content.len()).map_err(|_| {
            SensorError::Protocol(format!(
                "Record content of {} bytes exceeds {}",
                self.content.len(),
                MAX_CONTENT_LEN
            ))
        })?;
        let padding_length = padding_for(self.content.len());

        buf.reserve(HEADER_LEN + self.content.len() + padding_length as usize);
        Header {
            version: FCGI_VERSION_1,
            record_type: self.record_type,
            request_id: self.request_id,
            content_length,
            padding_length,
        }
        .encode(buf);
        buf.put_slice(&self.content);
        buf.put_bytes(0, padding_length as usize);
        Ok(())
    }

    /// Decode a single record from the start of `data`.
    ///
    /// Returns the record and the number of bytes consumed, padding included.
    pub fn decode(data: &[u8]) -> AppResult<(Self, usize)> {
        let header = Header::decode(data)?;
        let content_end = HEADER_LEN + header.content_length as usize;
        let total = content_end + header.padding_length as usize;
        if data.len() < total {
            return Err(SensorError::Protocol("Record size mismatch".to_string()));
        }
        Ok((
            Record {
                record_type: header.record_type,
                request_id: header.request_id,
                content: data[HEADER_LEN..content_end].to_vec(),
            },
            total,
        ))
    }

    /// Read one record from `reader`.
    ///
    /// Returns `Ok(None)` when the peer closed the connection before a new
    /// header started.
    pub async fn read_from<R>(reader: &mut R) -> AppResult<Option<Self>>
    where
        R: AsyncRead + Unpin,
    {
        let mut raw = [0u8; HEADER_LEN];
        match reader.read_exact(&mut raw).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let header = Header::decode(&raw)?;

        let mut content = vec![0u8; header.content_length as usize];
        reader.read_exact(&mut content).await?;
        if header.padding_length > 0 {
            let mut padding = [0u8; 255];
            reader
                .read_exact(&mut padding[..header.padding_length as usize])
                .await?;
        }

        Ok(Some(Record {
            record_type: header.record_type,
            request_id: header.request_id,
            content,
        }))
    }
}

/// Padding needed to bring `content_len` to a multiple of 8
fn padding_for(content_len: usize) -> u8 {
    ((8 - content_len % 8) % 8) as u8
}

/// Encode `data` as a stream of records of `record_type`, each carrying at
/// most [`MAX_CONTENT_LEN`] bytes, followed by the empty end-of-stream record.
pub fn encode_stream(
    record_type: RecordType,
    request_id: u16,
    data: &[u8],
    buf: &mut BytesMut,
) -> AppResult<()> {
    for chunk in data.chunks(MAX_CONTENT_LEN) {
        Record::new(record_type, request_id, chunk.to_vec()).encode(buf)?;
    }
    Record::new(record_type, request_id, Vec::new()).encode(buf)
}

/// Body of `FCGI_BEGIN_REQUEST`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequestBody {
    /// Raw role value
    pub role: u16,
    /// Flags, see [`FCGI_KEEP_CONN`]
    pub flags: u8,
}

impl BeginRequestBody {
    /// Decode from record content
    pub fn decode(data: &[u8]) -> AppResult<Self> {
        if data.len() < 8 {
            return Err(SensorError::Protocol(
                "Insufficient data for FCGI_BEGIN_REQUEST".to_string(),
            ));
        }
        Ok(Self {
            role: u16::from_be_bytes([data[0], data[1]]),
            flags: data[2],
        })
    }

    /// Encode to record content
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u16(self.role);
        buf.put_u8(self.flags);
        buf.put_bytes(0, 5);
        buf.to_vec()
    }

    /// Known role, if any
    pub fn role(&self) -> Option<Role> {
        Role::from_u16(self.role)
    }

    /// Whether the web server wants to reuse the connection
    pub fn keep_conn(&self) -> bool {
        self.flags & FCGI_KEEP_CONN != 0
    }
}

/// Body of `FCGI_END_REQUEST`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequestBody {
    /// Application exit status
    pub app_status: u32,
    /// Protocol-level outcome
    pub protocol_status: ProtocolStatus,
}

impl EndRequestBody {
    /// Encode to record content
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32(self.app_status);
        buf.put_u8(self.protocol_status as u8);
        buf.put_bytes(0, 3);
        buf.to_vec()
    }

    /// Decode from record content
    pub fn decode(data: &[u8]) -> AppResult<Self> {
        if data.len() < 8 {
            return Err(SensorError::Protocol(
                "Insufficient data for FCGI_END_REQUEST".to_string(),
            ));
        }
        let protocol_status = ProtocolStatus::from_u8(data[4])
            .ok_or_else(|| SensorError::Protocol("Invalid protocol status".to_string()))?;
        Ok(Self {
            app_status: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            protocol_status,
        })
    }
}

/// Content of `FCGI_UNKNOWN_TYPE` for the given unrecognised type
pub fn unknown_type_body(record_type: u8) -> Vec<u8> {
    let mut content = vec![0u8; 8];
    content[0] = record_type;
    content
}

/// Append a name/value pair using the FastCGI length encoding.
///
/// Lengths up to 127 take one byte; longer ones take four with the high bit set.
pub fn encode_pair(name: &[u8], value: &[u8], buf: &mut BytesMut) {
    encode_length(name.len(), buf);
    encode_length(value.len(), buf);
    buf.put_slice(name);
    buf.put_slice(value);
}

fn encode_length(len: usize, buf: &mut BytesMut) {
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else {
        buf.put_u32(len as u32 | 0x8000_0000);
    }
}

/// Encode a list of pairs into record content
pub fn encode_pairs<K, V>(pairs: &[(K, V)]) -> Vec<u8>
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut buf = BytesMut::new();
    for (name, value) in pairs {
        encode_pair(name.as_ref(), value.as_ref(), &mut buf);
    }
    buf.to_vec()
}

/// Decode all name/value pairs in `data`. Invalid UTF-8 is replaced lossily.
pub fn decode_pairs(data: &[u8]) -> AppResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let name_len = decode_length(data, &mut pos)?;
        let value_len = decode_length(data, &mut pos)?;
        let end = pos + name_len + value_len;
        if end > data.len() {
            return Err(SensorError::Protocol(
                "Name/value pair exceeds record content".to_string(),
            ));
        }
        let name = String::from_utf8_lossy(&data[pos..pos + name_len]).into_owned();
        let value = String::from_utf8_lossy(&data[pos + name_len..end]).into_owned();
        pairs.push((name, value));
        pos = end;
    }
    Ok(pairs)
}

fn decode_length(data: &[u8], pos: &mut usize) -> AppResult<usize> {
    let first = *data
        .get(*pos)
        .ok_or_else(|| SensorError::Protocol("Truncated name/value length".to_string()))?;
    if first & 0x80 == 0 {
        *pos += 1;
        return Ok(first as usize);
    }
    let bytes = data
        .get(*pos..*pos + 4)
        .ok_or_else(|| SensorError::Protocol("Truncated name/value length".to_string()))?;
    *pos += 4;
    Ok((u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & 0x7fff_ffff) as usize)
}
