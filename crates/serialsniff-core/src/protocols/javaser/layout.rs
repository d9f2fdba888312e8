pub const STREAM_MAGIC: u16 = 0xACED;
pub const STREAM_VERSION: u16 = 5;
pub const HEADER_LEN: usize = 4;

pub const TC_NULL: u8 = 0x70;
pub const TC_REFERENCE: u8 = 0x71;
pub const TC_CLASSDESC: u8 = 0x72;
pub const TC_OBJECT: u8 = 0x73;
pub const TC_STRING: u8 = 0x74;
pub const TC_ARRAY: u8 = 0x75;
pub const TC_CLASS: u8 = 0x76;
pub const TC_BLOCKDATA: u8 = 0x77;
pub const TC_ENDBLOCKDATA: u8 = 0x78;
pub const TC_RESET: u8 = 0x79;
pub const TC_BLOCKDATALONG: u8 = 0x7A;
pub const TC_EXCEPTION: u8 = 0x7B;
pub const TC_LONGSTRING: u8 = 0x7C;
pub const TC_PROXYCLASSDESC: u8 = 0x7D;
pub const TC_ENUM: u8 = 0x7E;

pub const BASE_WIRE_HANDLE: u32 = 0x7E_0000;

pub const SC_WRITE_METHOD: u8 = 0x01;
pub const SC_SERIALIZABLE: u8 = 0x02;
pub const SC_EXTERNALIZABLE: u8 = 0x04;
pub const SC_BLOCK_DATA: u8 = 0x08;

/// Nesting limit for contents inside contents (objects holding objects).
pub const MAX_DEPTH: usize = 64;

pub const STRING_CLASS: &str = "java.lang.String";
pub const CLASS_CLASS: &str = "java.lang.Class";
pub const CLASS_DESC_CLASS: &str = "java.io.ObjectStreamClass";

/// Encoded width of a primitive field or array element, `None` for
/// object-typed codes (`L` and `[`).
pub fn primitive_width(type_code: u8) -> Option<usize> {
    match type_code {
        b'B' | b'Z' => Some(1),
        b'C' | b'S' => Some(2),
        b'I' | b'F' => Some(4),
        b'J' | b'D' => Some(8),
        _ => None,
    }
}

pub fn is_object_type_code(type_code: u8) -> bool {
    matches!(type_code, b'L' | b'[')
}
