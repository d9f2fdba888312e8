use std::rc::Rc;

use super::error::JavaSerError;
use super::layout;
use super::reader::JavaSerReader;

/// Outcome of decoding one top-level object from the start of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamObject {
    /// Class name of the decoded value; `None` for a serialized `null`.
    pub type_name: Option<String>,
    /// Bytes consumed, stream header included.
    pub consumed: usize,
}

#[derive(Debug)]
struct ClassDesc {
    name: String,
    flags: u8,
    field_codes: Vec<u8>,
    super_desc: Option<Rc<ClassDesc>>,
}

// Unlink the super-class chain iteratively; long chains built through back
// references would otherwise recurse once per link.
impl Drop for ClassDesc {
    fn drop(&mut self) {
        let mut next = self.super_desc.take();
        while let Some(desc) = next {
            next = match Rc::try_unwrap(desc) {
                Ok(mut inner) => inner.super_desc.take(),
                Err(_) => None,
            };
        }
    }
}

#[derive(Debug, Clone)]
enum Handle {
    /// Class descriptor whose handle was assigned but whose body is still
    /// being read.
    Pending,
    Desc(Rc<ClassDesc>),
    Value(Option<String>),
}

/// Decode exactly one object from the start of `data`: the four-byte stream
/// header followed by one content element.
///
/// The decoder is structural: class names are reported as they appear in the
/// stream and no class needs to be known in advance.
pub fn decode_stream_object(data: &[u8]) -> Result<StreamObject, JavaSerError> {
    let mut decoder = Decoder {
        reader: JavaSerReader::new(data),
        handles: Vec::new(),
        depth: 0,
    };
    decoder.read_header()?;
    let type_name = decoder.read_content()?;
    Ok(StreamObject {
        type_name,
        consumed: decoder.reader.position(),
    })
}

struct Decoder<'a> {
    reader: JavaSerReader<'a>,
    handles: Vec<Handle>,
    depth: usize,
}

impl Decoder<'_> {
    fn read_header(&mut self) -> Result<(), JavaSerError> {
        self.reader.require(layout::HEADER_LEN)?;
        let magic = self.reader.read_u16()?;
        if magic != layout::STREAM_MAGIC {
            return Err(JavaSerError::BadMagic { found: magic });
        }
        let version = self.reader.read_u16()?;
        if version != layout::STREAM_VERSION {
            return Err(JavaSerError::BadVersion { found: version });
        }
        Ok(())
    }

    fn assign(&mut self, handle: Handle) -> usize {
        self.handles.push(handle);
        self.handles.len() - 1
    }

    fn lookup(&mut self) -> Result<Handle, JavaSerError> {
        let handle = self.reader.read_u32()?;
        let index = handle
            .checked_sub(layout::BASE_WIRE_HANDLE)
            .ok_or(JavaSerError::InvalidHandle { handle })? as usize;
        match self.handles.get(index) {
            Some(Handle::Pending) | None => Err(JavaSerError::InvalidHandle { handle }),
            Some(entry) => Ok(entry.clone()),
        }
    }

    /// Run `read` one nesting level deeper. Contents and class descriptors
    /// share the same budget.
    fn nested<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, JavaSerError>,
    ) -> Result<T, JavaSerError> {
        if self.depth >= layout::MAX_DEPTH {
            return Err(JavaSerError::TooDeep {
                limit: layout::MAX_DEPTH,
            });
        }
        self.depth += 1;
        let result = read(self);
        self.depth -= 1;
        result
    }

    fn read_content(&mut self) -> Result<Option<String>, JavaSerError> {
        self.nested(Self::read_content_inner)
    }

    fn read_content_inner(&mut self) -> Result<Option<String>, JavaSerError> {
        loop {
            let code = self.reader.read_u8()?;
            return match code {
                layout::TC_NULL => Ok(None),
                layout::TC_REFERENCE => match self.lookup()? {
                    Handle::Value(type_name) => Ok(type_name),
                    _ => Ok(Some(layout::CLASS_DESC_CLASS.to_string())),
                },
                layout::TC_STRING | layout::TC_LONGSTRING => {
                    self.read_string_body(code)?;
                    Ok(Some(layout::STRING_CLASS.to_string()))
                }
                layout::TC_OBJECT => self.read_object().map(Some),
                layout::TC_ARRAY => self.read_array().map(Some),
                layout::TC_ENUM => self.read_enum().map(Some),
                layout::TC_CLASS => {
                    self.read_class_desc()?;
                    self.assign(Handle::Value(Some(layout::CLASS_CLASS.to_string())));
                    Ok(Some(layout::CLASS_CLASS.to_string()))
                }
                layout::TC_CLASSDESC | layout::TC_PROXYCLASSDESC => {
                    self.read_new_class_desc(code)?;
                    Ok(Some(layout::CLASS_DESC_CLASS.to_string()))
                }
                layout::TC_RESET => {
                    self.handles.clear();
                    continue;
                }
                layout::TC_EXCEPTION => Err(JavaSerError::Unsupported("serialized exception")),
                _ => Err(JavaSerError::UnexpectedTypeCode {
                    code,
                    context: "content",
                }),
            };
        }
    }

    fn read_string_body(&mut self, code: u8) -> Result<String, JavaSerError> {
        let value = if code == layout::TC_LONGSTRING {
            self.reader.read_long_utf()?
        } else {
            self.reader.read_utf()?
        };
        self.assign(Handle::Value(Some(layout::STRING_CLASS.to_string())));
        Ok(value)
    }

    /// Field type signatures and enum constant names: a string or a back
    /// reference to one.
    fn read_string_element(&mut self, context: &'static str) -> Result<(), JavaSerError> {
        let code = self.reader.read_u8()?;
        match code {
            layout::TC_STRING | layout::TC_LONGSTRING => self.read_string_body(code).map(|_| ()),
            layout::TC_REFERENCE => match self.lookup()? {
                Handle::Value(Some(ref name)) if name == layout::STRING_CLASS => Ok(()),
                _ => Err(JavaSerError::UnexpectedTypeCode { code, context }),
            },
            _ => Err(JavaSerError::UnexpectedTypeCode { code, context }),
        }
    }

    fn read_class_desc(&mut self) -> Result<Option<Rc<ClassDesc>>, JavaSerError> {
        let code = self.reader.read_u8()?;
        match code {
            layout::TC_NULL => Ok(None),
            layout::TC_REFERENCE => match self.lookup()? {
                Handle::Desc(desc) => Ok(Some(desc)),
                _ => Err(JavaSerError::UnexpectedTypeCode {
                    code,
                    context: "class descriptor reference",
                }),
            },
            layout::TC_CLASSDESC | layout::TC_PROXYCLASSDESC => {
                self.read_new_class_desc(code).map(Some)
            }
            _ => Err(JavaSerError::UnexpectedTypeCode {
                code,
                context: "class descriptor",
            }),
        }
    }

    fn required_class_desc(&mut self, context: &'static str) -> Result<Rc<ClassDesc>, JavaSerError> {
        self.read_class_desc()?.ok_or(JavaSerError::UnexpectedTypeCode {
            code: layout::TC_NULL,
            context,
        })
    }

    fn read_new_class_desc(&mut self, code: u8) -> Result<Rc<ClassDesc>, JavaSerError> {
        self.nested(|decoder| decoder.read_new_class_desc_body(code))
    }

    fn read_new_class_desc_body(&mut self, code: u8) -> Result<Rc<ClassDesc>, JavaSerError> {
        let (name, flags, field_codes) = if code == layout::TC_PROXYCLASSDESC {
            let count = self.reader.read_i32()?;
            if count < 0 {
                return Err(JavaSerError::InvalidLength {
                    length: count as i64,
                    context: "proxy interface count",
                });
            }
            let mut interfaces = Vec::new();
            for _ in 0..count {
                interfaces.push(self.reader.read_utf()?);
            }
            let name = format!("$Proxy[{}]", interfaces.join(","));
            (name, layout::SC_SERIALIZABLE, Vec::new())
        } else {
            let name = self.reader.read_utf()?;
            let _serial_version_uid = self.reader.read_u64()?;
            let flags = self.reader.read_u8()?;
            let count = self.reader.read_u16()?;
            let mut field_codes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let type_code = self.reader.read_u8()?;
                let _field_name = self.reader.read_utf()?;
                if layout::is_object_type_code(type_code) {
                    self.read_string_element("field type signature")?;
                } else if layout::primitive_width(type_code).is_none() {
                    return Err(JavaSerError::UnexpectedTypeCode {
                        code: type_code,
                        context: "field type",
                    });
                }
                field_codes.push(type_code);
            }
            (name, flags, field_codes)
        };

        let slot = self.assign(Handle::Pending);
        self.skip_annotation()?;
        let super_desc = self.read_class_desc()?;
        let desc = Rc::new(ClassDesc {
            name,
            flags,
            field_codes,
            super_desc,
        });
        self.handles[slot] = Handle::Desc(Rc::clone(&desc));
        Ok(desc)
    }

    /// Skip block data and nested contents up to the closing
    /// `TC_ENDBLOCKDATA`.
    fn skip_annotation(&mut self) -> Result<(), JavaSerError> {
        loop {
            match self.reader.peek_u8()? {
                layout::TC_ENDBLOCKDATA => {
                    self.reader.read_u8()?;
                    return Ok(());
                }
                layout::TC_BLOCKDATA => {
                    self.reader.read_u8()?;
                    let len = self.reader.read_u8()? as usize;
                    self.reader.skip(len)?;
                }
                layout::TC_BLOCKDATALONG => {
                    self.reader.read_u8()?;
                    let len = self.reader.read_i32()?;
                    let len = usize::try_from(len).map_err(|_| JavaSerError::InvalidLength {
                        length: len as i64,
                        context: "block data",
                    })?;
                    self.reader.skip(len)?;
                }
                _ => {
                    self.read_content()?;
                }
            }
        }
    }

    fn read_object(&mut self) -> Result<String, JavaSerError> {
        let desc = self.required_class_desc("object class descriptor")?;
        self.assign(Handle::Value(Some(desc.name.clone())));

        let mut hierarchy = Vec::new();
        let mut current = Some(Rc::clone(&desc));
        while let Some(class) = current {
            current = class.super_desc.clone();
            hierarchy.push(class);
        }

        for class in hierarchy.iter().rev() {
            if class.flags & layout::SC_SERIALIZABLE != 0 {
                for &type_code in &class.field_codes {
                    self.read_field_value(type_code)?;
                }
                if class.flags & layout::SC_WRITE_METHOD != 0 {
                    self.skip_annotation()?;
                }
            } else if class.flags & layout::SC_EXTERNALIZABLE != 0 {
                if class.flags & layout::SC_BLOCK_DATA == 0 {
                    return Err(JavaSerError::Unsupported(
                        "externalizable data without block framing",
                    ));
                }
                self.skip_annotation()?;
            }
        }
        Ok(desc.name.clone())
    }

    fn read_field_value(&mut self, type_code: u8) -> Result<(), JavaSerError> {
        match layout::primitive_width(type_code) {
            Some(width) => self.reader.skip(width),
            None => self.read_content().map(|_| ()),
        }
    }

    fn read_array(&mut self) -> Result<String, JavaSerError> {
        let desc = self.required_class_desc("array class descriptor")?;
        self.assign(Handle::Value(Some(desc.name.clone())));
        let size = self.reader.read_i32()?;
        let size = usize::try_from(size).map_err(|_| JavaSerError::InvalidLength {
            length: size as i64,
            context: "array",
        })?;

        let element_code = desc.name.as_bytes().get(1).copied().unwrap_or(b'L');
        match layout::primitive_width(element_code) {
            Some(width) => {
                let total = size.checked_mul(width).ok_or(JavaSerError::InvalidLength {
                    length: size as i64,
                    context: "array",
                })?;
                self.reader.skip(total)?;
            }
            None => {
                for _ in 0..size {
                    self.read_content()?;
                }
            }
        }
        Ok(desc.name.clone())
    }

    fn read_enum(&mut self) -> Result<String, JavaSerError> {
        let desc = self.required_class_desc("enum class descriptor")?;
        self.assign(Handle::Value(Some(desc.name.clone())));
        self.read_string_element("enum constant name")?;
        Ok(desc.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::decode_stream_object;
    use crate::protocols::javaser::error::JavaSerError;
    use crate::protocols::javaser::layout;

    fn header() -> Vec<u8> {
        vec![0xAC, 0xED, 0x00, 0x05]
    }

    fn utf(value: &str) -> Vec<u8> {
        let mut out = (value.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(value.as_bytes());
        out
    }

    /// `java.lang.Integer` with its `java.lang.Number` super class.
    fn integer_object(value: i32) -> Vec<u8> {
        let mut out = header();
        out.push(layout::TC_OBJECT);
        out.push(layout::TC_CLASSDESC);
        out.extend(utf("java.lang.Integer"));
        out.extend(0x12E2_A0A4_F781_8738u64.to_be_bytes());
        out.push(layout::SC_SERIALIZABLE);
        out.extend(1u16.to_be_bytes());
        out.push(b'I');
        out.extend(utf("value"));
        out.push(layout::TC_ENDBLOCKDATA);
        out.push(layout::TC_CLASSDESC);
        out.extend(utf("java.lang.Number"));
        out.extend(0x86AC_951D_0B94_E08Bu64.to_be_bytes());
        out.push(layout::SC_SERIALIZABLE);
        out.extend(0u16.to_be_bytes());
        out.push(layout::TC_ENDBLOCKDATA);
        out.push(layout::TC_NULL);
        out.extend(value.to_be_bytes());
        out
    }

    #[test]
    fn decode_string() {
        let mut data = header();
        data.push(layout::TC_STRING);
        data.extend(utf("hello"));
        let decoded = decode_stream_object(&data).unwrap();
        assert_eq!(decoded.type_name.as_deref(), Some("java.lang.String"));
        assert_eq!(decoded.consumed, data.len());
    }

    #[test]
    fn decode_null_has_no_type() {
        let mut data = header();
        data.push(layout::TC_NULL);
        let decoded = decode_stream_object(&data).unwrap();
        assert_eq!(decoded.type_name, None);
        assert_eq!(decoded.consumed, 5);
    }

    #[test]
    fn decode_object_with_super_class_stops_at_object_end() {
        let mut data = integer_object(42);
        let object_len = data.len();
        data.extend_from_slice(&[0xDE, 0xAD]);
        let decoded = decode_stream_object(&data).unwrap();
        assert_eq!(decoded.type_name.as_deref(), Some("java.lang.Integer"));
        assert_eq!(decoded.consumed, object_len);
    }

    #[test]
    fn decode_object_field_with_back_reference() {
        // class Pair { String a; String b; } where b references a's value.
        let mut data = header();
        data.push(layout::TC_OBJECT);
        data.push(layout::TC_CLASSDESC);
        data.extend(utf("demo.Pair"));
        data.extend(1u64.to_be_bytes());
        data.push(layout::SC_SERIALIZABLE);
        data.extend(2u16.to_be_bytes());
        data.push(b'L');
        data.extend(utf("a"));
        data.push(layout::TC_STRING);
        data.extend(utf("Ljava/lang/String;"));
        data.push(b'L');
        data.extend(utf("b"));
        data.push(layout::TC_REFERENCE);
        data.extend(layout::BASE_WIRE_HANDLE.to_be_bytes());
        data.push(layout::TC_ENDBLOCKDATA);
        data.push(layout::TC_NULL);
        // handles: 0 = signature string, 1 = class desc, 2 = object, 3 = "x"
        data.push(layout::TC_STRING);
        data.extend(utf("x"));
        data.push(layout::TC_REFERENCE);
        data.extend((layout::BASE_WIRE_HANDLE + 3).to_be_bytes());

        let decoded = decode_stream_object(&data).unwrap();
        assert_eq!(decoded.type_name.as_deref(), Some("demo.Pair"));
        assert_eq!(decoded.consumed, data.len());
    }

    #[test]
    fn decode_primitive_array() {
        let mut data = header();
        data.push(layout::TC_ARRAY);
        data.push(layout::TC_CLASSDESC);
        data.extend(utf("[B"));
        data.extend(0xACF3_17F8_0608_54E0u64.to_be_bytes());
        data.push(layout::SC_SERIALIZABLE);
        data.extend(0u16.to_be_bytes());
        data.push(layout::TC_ENDBLOCKDATA);
        data.push(layout::TC_NULL);
        data.extend(3i32.to_be_bytes());
        data.extend([1, 2, 3]);
        let decoded = decode_stream_object(&data).unwrap();
        assert_eq!(decoded.type_name.as_deref(), Some("[B"));
        assert_eq!(decoded.consumed, data.len());
    }

    #[test]
    fn decode_enum_constant() {
        let mut data = header();
        data.push(layout::TC_ENUM);
        data.push(layout::TC_CLASSDESC);
        data.extend(utf("demo.Color"));
        data.extend(0u64.to_be_bytes());
        data.push(0x12);
        data.extend(0u16.to_be_bytes());
        data.push(layout::TC_ENDBLOCKDATA);
        data.push(layout::TC_NULL);
        data.push(layout::TC_STRING);
        data.extend(utf("RED"));
        let decoded = decode_stream_object(&data).unwrap();
        assert_eq!(decoded.type_name.as_deref(), Some("demo.Color"));
    }

    #[test]
    fn write_method_annotation_is_skipped() {
        let mut data = header();
        data.push(layout::TC_OBJECT);
        data.push(layout::TC_CLASSDESC);
        data.extend(utf("demo.Custom"));
        data.extend(7u64.to_be_bytes());
        data.push(layout::SC_SERIALIZABLE | layout::SC_WRITE_METHOD);
        data.extend(0u16.to_be_bytes());
        data.push(layout::TC_ENDBLOCKDATA);
        data.push(layout::TC_NULL);
        data.push(layout::TC_BLOCKDATA);
        data.push(4);
        data.extend([0, 0, 0, 9]);
        data.push(layout::TC_ENDBLOCKDATA);
        let decoded = decode_stream_object(&data).unwrap();
        assert_eq!(decoded.type_name.as_deref(), Some("demo.Custom"));
        assert_eq!(decoded.consumed, data.len());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let data = [0xAC, 0xEE, 0x00, 0x05, layout::TC_NULL];
        let err = decode_stream_object(&data).unwrap_err();
        assert_eq!(err, JavaSerError::BadMagic { found: 0xACEE });
    }

    #[test]
    fn truncated_object_is_rejected() {
        let data = integer_object(1);
        let err = decode_stream_object(&data[..data.len() - 2]).unwrap_err();
        assert!(matches!(err, JavaSerError::TooShort { .. }));
    }

    #[test]
    fn top_level_block_data_is_rejected() {
        let mut data = header();
        data.extend([layout::TC_BLOCKDATA, 1, 0]);
        let err = decode_stream_object(&data).unwrap_err();
        assert!(matches!(err, JavaSerError::UnexpectedTypeCode { .. }));
    }

    #[test]
    fn long_super_class_chain_is_rejected_without_overflow() {
        let mut data = header();
        data.push(layout::TC_OBJECT);
        for _ in 0..5_000 {
            data.push(layout::TC_CLASSDESC);
            data.extend(utf(""));
            data.extend(0u64.to_be_bytes());
            data.push(layout::SC_SERIALIZABLE);
            data.extend(0u16.to_be_bytes());
            data.push(layout::TC_ENDBLOCKDATA);
        }
        data.push(layout::TC_NULL);
        let err = decode_stream_object(&data).unwrap_err();
        assert_eq!(
            err,
            JavaSerError::TooDeep {
                limit: layout::MAX_DEPTH
            }
        );
    }

    #[test]
    fn super_class_chain_within_limit_decodes() {
        let mut data = header();
        data.push(layout::TC_OBJECT);
        for depth in 0..layout::MAX_DEPTH - 2 {
            data.push(layout::TC_CLASSDESC);
            data.extend(utf(&format!("demo.Level{depth}")));
            data.extend(0u64.to_be_bytes());
            data.push(layout::SC_SERIALIZABLE);
            data.extend(0u16.to_be_bytes());
            data.push(layout::TC_ENDBLOCKDATA);
        }
        data.push(layout::TC_NULL);
        let decoded = decode_stream_object(&data).unwrap();
        assert_eq!(decoded.type_name.as_deref(), Some("demo.Level0"));
        assert_eq!(decoded.consumed, data.len());
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let mut data = header();
        data.push(layout::TC_REFERENCE);
        data.extend((layout::BASE_WIRE_HANDLE + 5).to_be_bytes());
        let err = decode_stream_object(&data).unwrap_err();
        assert!(matches!(err, JavaSerError::InvalidHandle { .. }));
    }
}
