//! Exception marshalling.
//!
//! A fault crossing the boundary travels as an array of `ExceptionRecord`s:
//! the outer error first, then its causes in order. Each record is four
//! independently-owned spans — stable kind tag, kind-specific auxiliary
//! info, message, remote backtrace. No type system is shared; the tag
//! string is the whole contract.
//!
//! Auxiliary info is self-describing: a sequence of fields, each a u32
//! little-endian byte length followed by that many bytes, in a fixed
//! per-kind order. Numeric fields are decimal ASCII inside their field.
//! A field value may therefore contain any byte, including what older
//! separator-based schemes would have choked on.

use crate::error::{AbiError, AbiErrorKind};
use crate::memory::MemorySpan;

/// One marshalled error. An empty/null `kind` span means "no exception".
///
/// All four spans are owned by the record and freed exactly once, via
/// [`ExceptionRecord::dispose`].
#[repr(C)]
#[derive(Debug)]
pub struct ExceptionRecord {
    pub kind: MemorySpan,
    pub info: MemorySpan,
    pub message: MemorySpan,
    pub backtrace: MemorySpan,
}

impl ExceptionRecord {
    /// The "no exception" record.
    pub const fn none() -> Self {
        Self {
            kind: MemorySpan::empty(),
            info: MemorySpan::empty(),
            message: MemorySpan::empty(),
            backtrace: MemorySpan::empty(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind.is_empty()
    }

    /// Encode one error (without its causes) into a record.
    pub fn encode(err: &AbiError) -> Self {
        let codec = codec_for(err.kind.tag());
        let mut info = Vec::new();
        if let Some(codec) = codec {
            (codec.encode)(&err.kind, &mut info);
        }
        Self {
            kind: MemorySpan::copy_from_str(err.kind.tag()),
            info: MemorySpan::from_bytes(&info),
            message: MemorySpan::copy_from_str(&err.message),
            backtrace: match &err.backtrace {
                Some(bt) => MemorySpan::copy_from_str(bt),
                None => MemorySpan::empty(),
            },
        }
    }

    /// Decode this record into an error (no cause attached).
    ///
    /// An unknown tag is *not* corruption — it decodes to a generic error
    /// carrying the message and backtrace. Malformed info for a known tag
    /// is corruption and fails.
    pub fn decode(&self) -> Result<AbiError, AbiError> {
        let tag = self.kind.to_str()?;
        let kind = match codec_for(tag) {
            Some(codec) => {
                let mut reader = FieldReader::new(self.info.as_slice());
                (codec.decode)(&mut reader)?
            }
            None => AbiErrorKind::Generic,
        };
        let message = self.message.to_str()?.to_string();
        let mut err = AbiError::new(kind, message);
        if !self.backtrace.is_empty() {
            err = err.with_backtrace(self.backtrace.to_str()?);
        }
        Ok(err)
    }

    /// Free all four spans. Idempotent through each span's freed flag.
    pub fn dispose(&mut self) {
        self.kind.dispose();
        self.info.dispose();
        self.message.dispose();
        self.backtrace.dispose();
    }
}

// =============================================================================
// Chain transport
// =============================================================================

/// Flatten an error and its cause chain into a native record array.
///
/// Returns `(count, ptr)`; ownership of the array and every span in it
/// transfers to the caller, who must release it with [`free_chain`].
pub fn encode_chain(err: &AbiError) -> (u32, *mut ExceptionRecord) {
    let mut chain: Vec<&AbiError> = std::iter::once(err).chain(err.causes()).collect();
    // An aggregate is not unpacked: the aggregate record itself plus its
    // first contained error alone are surfaced, which the single-linked
    // cause chain already guarantees.
    let count = chain.len();
    let bytes = count * std::mem::size_of::<ExceptionRecord>();
    let ptr = unsafe { libc::malloc(bytes) } as *mut ExceptionRecord;
    if ptr.is_null() {
        std::process::abort();
    }
    for (i, e) in chain.drain(..).enumerate() {
        unsafe { ptr.add(i).write(ExceptionRecord::encode(e)) };
    }
    (count as u32, ptr)
}

/// Rebuild an error chain from a record array.
///
/// Returns `None` for an empty array or a leading "no exception" record.
/// A record that fails to decode truncates the chain at that point — the
/// already-decoded outer records are never lost.
///
/// # Safety
///
/// `ptr`, if non-null, must point to `count` valid records.
pub unsafe fn decode_chain(count: u32, ptr: *const ExceptionRecord) -> Option<AbiError> {
    if ptr.is_null() || count == 0 {
        return None;
    }
    let records = std::slice::from_raw_parts(ptr, count as usize);
    let mut decoded: Vec<AbiError> = Vec::with_capacity(records.len());
    for record in records {
        if record.is_none() {
            break;
        }
        match record.decode() {
            Ok(err) => decoded.push(err),
            Err(_) => break, // corrupt record: keep what we have
        }
    }
    // Link back to front: each record becomes the cause of the previous.
    let mut chain: Option<AbiError> = None;
    while let Some(mut err) = decoded.pop() {
        if let Some(inner) = chain.take() {
            err = err.with_cause(inner);
        }
        chain = Some(err);
    }
    chain
}

/// Dispose every record and free the array itself. Safe on null.
///
/// # Safety
///
/// `ptr`, if non-null, must be an array of `count` records obtained from
/// [`encode_chain`] and not freed before.
pub unsafe fn free_chain(count: u32, ptr: *mut ExceptionRecord) {
    if ptr.is_null() {
        return;
    }
    for i in 0..count as usize {
        (*ptr.add(i)).dispose();
    }
    libc::free(ptr as *mut libc::c_void);
}

// =============================================================================
// Info field codec
// =============================================================================

/// Append one length-prefixed field.
fn push_field(buf: &mut Vec<u8>, value: &[u8]) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
}

fn push_str(buf: &mut Vec<u8>, value: &str) {
    push_field(buf, value.as_bytes());
}

fn push_display(buf: &mut Vec<u8>, value: impl std::fmt::Display) {
    push_field(buf, value.to_string().as_bytes());
}

/// Cursor over length-prefixed info fields.
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Next raw field, or a corruption error if the prefix overruns.
    pub fn next(&mut self) -> Result<&'a [u8], AbiError> {
        let header_end = self
            .pos
            .checked_add(4)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| AbiError::invalid_argument("info"))?;
        let len = u32::from_le_bytes(
            self.data[self.pos..header_end].try_into().unwrap_or([0; 4]),
        ) as usize;
        let end = header_end
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| AbiError::invalid_argument("info"))?;
        let field = &self.data[header_end..end];
        self.pos = end;
        Ok(field)
    }

    pub fn next_str(&mut self) -> Result<&'a str, AbiError> {
        std::str::from_utf8(self.next()?).map_err(|_| AbiError::invalid_argument("info"))
    }

    pub fn next_parse<T: std::str::FromStr>(&mut self) -> Result<T, AbiError> {
        self.next_str()?
            .parse()
            .map_err(|_| AbiError::invalid_argument("info"))
    }
}

// =============================================================================
// Kind registry
// =============================================================================

type EncodeInfoFn = fn(&AbiErrorKind, &mut Vec<u8>);
type DecodeInfoFn = fn(&mut FieldReader<'_>) -> Result<AbiErrorKind, AbiError>;

struct KindCodec {
    tag: &'static str,
    encode: EncodeInfoFn,
    decode: DecodeInfoFn,
}

fn no_info(_: &AbiErrorKind, _: &mut Vec<u8>) {}

fn name_info(kind: &AbiErrorKind, buf: &mut Vec<u8>) {
    match kind {
        AbiErrorKind::InvalidArgument { name }
        | AbiErrorKind::NullArgument { name }
        | AbiErrorKind::ArgumentOutOfRange { name } => push_str(buf, name),
        _ => {}
    }
}

/// One (encode, decode) pair per kind; the tag is the lookup key.
static REGISTRY: &[KindCodec] = &[
    KindCodec {
        tag: "generic",
        encode: no_info,
        decode: |_| Ok(AbiErrorKind::Generic),
    },
    KindCodec {
        tag: "invalid-argument",
        encode: name_info,
        decode: |r| Ok(AbiErrorKind::InvalidArgument { name: r.next_str()?.to_string() }),
    },
    KindCodec {
        tag: "null-argument",
        encode: name_info,
        decode: |r| Ok(AbiErrorKind::NullArgument { name: r.next_str()?.to_string() }),
    },
    KindCodec {
        tag: "argument-out-of-range",
        encode: name_info,
        decode: |r| Ok(AbiErrorKind::ArgumentOutOfRange { name: r.next_str()?.to_string() }),
    },
    KindCodec {
        tag: "not-supported",
        encode: no_info,
        decode: |_| Ok(AbiErrorKind::NotSupported),
    },
    KindCodec {
        tag: "not-implemented",
        encode: no_info,
        decode: |_| Ok(AbiErrorKind::NotImplemented),
    },
    KindCodec {
        tag: "invalid-operation",
        encode: no_info,
        decode: |_| Ok(AbiErrorKind::InvalidOperation),
    },
    KindCodec {
        tag: "timeout",
        encode: no_info,
        decode: |_| Ok(AbiErrorKind::Timeout),
    },
    KindCodec {
        tag: "cancelled",
        encode: no_info,
        decode: |_| Ok(AbiErrorKind::Cancelled),
    },
    KindCodec {
        tag: "disposed",
        encode: |kind, buf| {
            if let AbiErrorKind::Disposed { resource } = kind {
                push_str(buf, resource);
            }
        },
        decode: |r| Ok(AbiErrorKind::Disposed { resource: r.next_str()?.to_string() }),
    },
    KindCodec {
        tag: "io",
        encode: |kind, buf| {
            if let AbiErrorKind::Io { code } = kind {
                push_display(buf, code);
            }
        },
        decode: |r| Ok(AbiErrorKind::Io { code: r.next_parse()? }),
    },
    KindCodec {
        tag: "network",
        encode: |kind, buf| {
            if let AbiErrorKind::Network { status, code } = kind {
                push_display(buf, status);
                push_display(buf, code);
            }
        },
        decode: |r| {
            Ok(AbiErrorKind::Network {
                status: r.next_parse()?,
                code: r.next_parse()?,
            })
        },
    },
    KindCodec {
        tag: "type-init",
        encode: |kind, buf| {
            if let AbiErrorKind::TypeInit { type_name } = kind {
                push_str(buf, type_name);
            }
        },
        decode: |r| Ok(AbiErrorKind::TypeInit { type_name: r.next_str()?.to_string() }),
    },
    KindCodec {
        tag: "aggregate",
        encode: no_info,
        decode: |_| Ok(AbiErrorKind::Aggregate),
    },
];

fn codec_for(tag: &str) -> Option<&'static KindCodec> {
    REGISTRY.iter().find(|c| c.tag == tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(err: &AbiError) -> AbiError {
        let mut record = ExceptionRecord::encode(err);
        let decoded = record.decode().expect("decode");
        record.dispose();
        decoded
    }

    #[test]
    fn network_error_round_trips_aux_fields() {
        let err = AbiError::network(404, -0x7ffc, "manifest fetch failed")
            .with_backtrace("at fetch_manifest\nat run");
        let back = round_trip(&err);
        assert_eq!(back.kind, AbiErrorKind::Network { status: 404, code: -0x7ffc });
        assert_eq!(back.message, "manifest fetch failed");
        assert!(back.backtrace.as_deref().unwrap().contains("fetch_manifest"));
    }

    #[test]
    fn every_registered_kind_round_trips() {
        let errors = [
            AbiError::generic("g"),
            AbiError::invalid_argument("count"),
            AbiError::null_argument("handle"),
            AbiError::argument_out_of_range("offset"),
            AbiError::not_supported("n"),
            AbiError::not_implemented("n"),
            AbiError::invalid_operation("n"),
            AbiError::timeout("n"),
            AbiError::cancelled(),
            AbiError::disposed("token vault"),
            AbiError::io(13, "permission denied"),
            AbiError::network(503, 7, "unavailable"),
            AbiError::type_init("GameManager", "static init threw"),
            AbiError::aggregate("three tasks failed"),
        ];
        for err in &errors {
            let back = round_trip(err);
            assert_eq!(back.kind, err.kind, "kind for tag {}", err.kind.tag());
            assert_eq!(back.message, err.message);
        }
    }

    #[test]
    fn unknown_tag_falls_back_to_generic() {
        let mut record = ExceptionRecord {
            kind: MemorySpan::copy_from_str("quantum-flux"),
            info: MemorySpan::empty(),
            message: MemorySpan::copy_from_str("novel failure"),
            backtrace: MemorySpan::copy_from_str("trace"),
        };
        let decoded = record.decode().unwrap();
        assert_eq!(decoded.kind, AbiErrorKind::Generic);
        assert_eq!(decoded.message, "novel failure");
        assert_eq!(decoded.backtrace.as_deref(), Some("trace"));
        record.dispose();
    }

    #[test]
    fn message_may_contain_any_bytes() {
        // The old separator-delimited scheme would misparse this.
        let err = AbiError::disposed("a$b$c").with_cause(AbiError::generic("x\0y$z"));
        let back = round_trip(&err);
        assert_eq!(back.kind, AbiErrorKind::Disposed { resource: "a$b$c".into() });
    }

    #[test]
    fn chain_round_trips_three_levels() {
        let err = AbiError::generic("update failed").with_cause(
            AbiError::network(502, -1, "bad gateway")
                .with_cause(AbiError::io(110, "connection timed out")),
        );
        let (count, ptr) = encode_chain(&err);
        assert_eq!(count, 3);
        let back = unsafe { decode_chain(count, ptr) }.expect("chain");
        unsafe { free_chain(count, ptr) };

        assert_eq!(back.message, "update failed");
        let mid = back.cause.as_deref().expect("mid");
        assert_eq!(mid.kind, AbiErrorKind::Network { status: 502, code: -1 });
        let inner = mid.cause.as_deref().expect("inner");
        assert_eq!(inner.kind, AbiErrorKind::Io { code: 110 });
        assert!(inner.cause.is_none());
    }

    #[test]
    fn corrupt_middle_record_truncates_but_keeps_outer() {
        let err = AbiError::generic("outer")
            .with_cause(AbiError::network(500, 1, "mid").with_cause(AbiError::cancelled()));
        let (count, ptr) = encode_chain(&err);
        assert_eq!(count, 3);
        // Corrupt record 2's info: a known tag with truncated fields.
        unsafe {
            let mid = &mut *ptr.add(1);
            mid.info.dispose();
            mid.info = MemorySpan::from_bytes(&[0xFF, 0xFF, 0xFF, 0xFF]);
        }
        let back = unsafe { decode_chain(count, ptr) }.expect("outer survives");
        unsafe { free_chain(count, ptr) };

        assert_eq!(back.message, "outer");
        assert!(back.cause.is_none(), "chain truncated at the corrupt record");
    }

    #[test]
    fn empty_chain_and_none_record_decode_to_nothing() {
        assert!(unsafe { decode_chain(0, std::ptr::null()) }.is_none());
        let record = ExceptionRecord::none();
        assert!(record.is_none());
        assert!(unsafe { decode_chain(1, &record) }.is_none());
    }
}
