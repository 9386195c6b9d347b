//! # Tagged Object Layer
//!
//! Typed values over the raw field codec. Every object is prefixed with a
//! one-byte discriminant:
//!
//! | Tag  | Variant    | Payload                                      |
//! |------|------------|----------------------------------------------|
//! | `N`  | Null       | nothing                                      |
//! | `E`  | Enumerated | registered type name (UTF-8), marshalled body|
//! | `S`  | Serialized | i32 byte length, bincode body                |
//!
//! A type with a registered [`crate::marshal::Marshaller`] takes the
//! `Enumerated` path; anything else is serialized through `bincode` via the
//! cursor's `io` implementations, with the length patched in afterwards so
//! readers can skip or bound the payload.

use std::hash::Hash;

use eyre::{bail, ensure, eyre, Result};
use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::excerpt::Excerpt;
use crate::log::RecordLog;

const NULL: u8 = b'N';
const ENUMERATED: u8 = b'E';
const SERIALIZED: u8 = b'S';

/// Serialized payloads larger than this are treated as corruption.
const MAX_SERIALIZED_LEN: i32 = 16 << 20;

impl Excerpt {
    /// Writes a field through the marshaller registered for `T`.
    pub fn write_enum<T: 'static>(&mut self, value: &T) -> Result<()> {
        let marshaller = self.log().marshallers().acquire::<T>()?;
        marshaller.write(self, value)
    }

    /// Reads a field through the marshaller registered for `T`.
    pub fn read_enum<T: 'static>(&mut self) -> Result<T> {
        let marshaller = self.log().marshallers().acquire::<T>()?;
        marshaller.read(self)
    }

    /// Parses a delimited text field through the marshaller registered for
    /// `T`, consuming up to (and including) the stop character.
    pub fn parse_enum<T: 'static>(&mut self, mut stop: impl FnMut(char) -> bool) -> Result<T> {
        let marshaller = self.log().marshallers().acquire::<T>()?;
        marshaller.parse(self, &mut stop)
    }

    /// Writes a nullable object: the `Enumerated` variant when `T` has a
    /// registered marshaller, else the `Serialized` fallback.
    pub fn write_object<T>(&mut self, value: Option<&T>) -> Result<()>
    where
        T: Serialize + 'static,
    {
        let Some(value) = value else {
            return self.write_u8(NULL);
        };

        if let Some(marshaller) = self.log().marshallers().lookup::<T>() {
            let name = self
                .log()
                .marshallers()
                .registered_name::<T>()
                .ok_or_else(|| eyre!("marshaller registered without a name"))?;
            self.write_u8(ENUMERATED)?;
            self.write_utf8(Some(&name))?;
            return marshaller.write(self, value);
        }

        self.write_u8(SERIALIZED)?;
        let length_at = self.position();
        self.write_i32(0)?; // patched with the payload length below
        bincode::serialize_into(&mut *self, value)
            .map_err(|e| eyre!("failed to serialize object: {}", e))?;
        let length = self.position() - length_at - 4;
        self.write_i32_at(length_at, length as i32)
    }

    /// Reads a nullable object written by [`Excerpt::write_object`].
    pub fn read_object<T>(&mut self) -> Result<Option<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let tag = self.read_u8()?;
        match tag {
            NULL => Ok(None),
            ENUMERATED => {
                let mut name = self.take_utf_scratch();
                let result = self.read_utf8_into(&mut name);
                let outcome = match result {
                    Ok(true) => {
                        let expected = self.log().marshallers().registered_name::<T>();
                        match expected {
                            Some(expected) if expected == name => {
                                self.log().marshallers().acquire::<T>()
                            }
                            Some(expected) => Err(eyre!(
                                "enumerated type {:?} does not match expected {:?}",
                                name,
                                expected
                            )),
                            None => Err(eyre!(
                                "no marshaller registered for {}",
                                std::any::type_name::<T>()
                            )),
                        }
                    }
                    Ok(false) => Err(eyre!("null type name in enumerated object")),
                    Err(e) => Err(e),
                };
                self.restore_utf_scratch(name);
                let marshaller = outcome?;
                Ok(Some(marshaller.read(self)?))
            }
            SERIALIZED => {
                let length = self.read_i32()?;
                ensure!(
                    (0..=MAX_SERIALIZED_LEN).contains(&length),
                    "unexpected serialized length: {}",
                    length
                );
                let end = self.position() + length as usize;
                let value: T = bincode::deserialize_from(&mut *self)
                    .map_err(|e| eyre!("failed to deserialize object: {}", e))?;
                ensure!(
                    self.position() == end,
                    "serialized object ended at {} but the length field said {}",
                    self.position(),
                    end
                );
                Ok(Some(value))
            }
            other => bail!("unknown object tag {:?}", other as char),
        }
    }

    /// A counted sequence of nullable objects.
    pub fn write_list<T>(&mut self, list: &[T]) -> Result<()>
    where
        T: Serialize + 'static,
    {
        self.write_i32(list.len() as i32)?;
        for item in list {
            self.write_object(Some(item))?;
        }
        Ok(())
    }

    pub fn read_list<T>(&mut self) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let len = self.read_i32()?;
        ensure!(len >= 0, "negative list length {}", len);
        let mut out = Vec::new();
        for _ in 0..len {
            let item = self
                .read_object::<T>()?
                .ok_or_else(|| eyre!("null element in list"))?;
            out.push(item);
        }
        Ok(out)
    }

    /// A counted sequence of marshalled elements (no per-element tag).
    pub fn write_enum_list<T: 'static>(&mut self, list: &[T]) -> Result<()> {
        self.write_i32(list.len() as i32)?;
        for item in list {
            self.write_enum(item)?;
        }
        Ok(())
    }

    pub fn read_enum_list<T: 'static>(&mut self) -> Result<Vec<T>> {
        let len = self.read_i32()?;
        ensure!(len >= 0, "negative list length {}", len);
        let mut out = Vec::new();
        for _ in 0..len {
            out.push(self.read_enum()?);
        }
        Ok(out)
    }

    /// A counted sequence of marshalled key/value pairs.
    pub fn write_map<K: 'static, V: 'static>(&mut self, map: &HashMap<K, V>) -> Result<()> {
        self.write_i32(map.len() as i32)?;
        for (key, value) in map {
            self.write_enum(key)?;
            self.write_enum(value)?;
        }
        Ok(())
    }

    pub fn read_map<K, V>(&mut self) -> Result<HashMap<K, V>>
    where
        K: Eq + Hash + 'static,
        V: 'static,
    {
        let len = self.read_i32()?;
        ensure!(len >= 0, "negative map length {}", len);
        let mut out = HashMap::new();
        for _ in 0..len {
            let key = self.read_enum()?;
            let value = self.read_enum()?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::str::FromStr;

    use serde::{Deserialize, Serialize};
    use tempfile::{tempdir, TempDir};

    use crate::excerpt::Excerpt;
    use crate::log::{IndexedLog, RecordLog};
    use crate::marshal::TextMarshaller;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    enum Side {
        Buy,
        Sell,
    }

    impl fmt::Display for Side {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Side::Buy => "Buy",
                Side::Sell => "Sell",
            })
        }
    }

    impl FromStr for Side {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "Buy" => Ok(Side::Buy),
                "Sell" => Ok(Side::Sell),
                other => Err(format!("unknown side {:?}", other)),
            }
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        qty: u32,
        limit: i64,
    }

    fn scratch_excerpt() -> (TempDir, Excerpt) {
        let dir = tempdir().unwrap();
        let log = IndexedLog::builder(dir.path())
            .data_bits(16)
            .index_bits(12)
            .build()
            .unwrap();
        log.marshallers().register::<Side>("Side", TextMarshaller::new());
        (dir, log.excerpt())
    }

    #[test]
    fn enum_roundtrip_through_registered_marshaller() {
        let (_dir, mut e) = scratch_excerpt();
        e.start_excerpt(64).unwrap();
        e.write_enum(&Side::Sell).unwrap();
        e.set_position(0).unwrap();
        assert_eq!(e.read_enum::<Side>().unwrap(), Side::Sell);
    }

    #[test]
    fn object_null_and_enumerated_and_serialized() {
        let (_dir, mut e) = scratch_excerpt();
        e.start_excerpt(256).unwrap();
        e.write_object::<Side>(None).unwrap();
        e.write_object(Some(&Side::Buy)).unwrap();
        let order = Order { qty: 7, limit: -42 };
        e.write_object(Some(&order)).unwrap();
        e.set_position(0).unwrap();

        assert_eq!(e.read_object::<Side>().unwrap(), None);
        assert_eq!(e.read_object::<Side>().unwrap(), Some(Side::Buy));
        assert_eq!(e.read_object::<Order>().unwrap(), Some(order));
    }

    #[test]
    fn serialized_length_is_patched() {
        let (_dir, mut e) = scratch_excerpt();
        e.start_excerpt(256).unwrap();
        e.write_object(Some(&Order { qty: 1, limit: 2 })).unwrap();
        e.set_position(0).unwrap();
        assert_eq!(e.read_u8().unwrap(), b'S');
        // bincode fixed-width encoding: u32 + i64 = 12 bytes.
        assert_eq!(e.read_i32().unwrap(), 12);
    }

    #[test]
    fn enumerated_type_name_is_verified() {
        let (_dir, mut e) = scratch_excerpt();
        e.start_excerpt(64).unwrap();
        e.write_object(Some(&Side::Buy)).unwrap();
        e.set_position(0).unwrap();
        // Reading as String hits the name check: "Side" != "String".
        assert!(e.read_object::<String>().is_err());
    }

    #[test]
    fn lists_and_maps_roundtrip() {
        let (_dir, mut e) = scratch_excerpt();
        e.start_excerpt(512).unwrap();
        e.write_enum_list(&[Side::Buy, Side::Sell, Side::Buy]).unwrap();
        let mut map = hashbrown::HashMap::new();
        map.insert("alpha".to_string(), "1".to_string());
        map.insert("beta".to_string(), "2".to_string());
        e.write_map(&map).unwrap();
        e.write_list(&[Order { qty: 1, limit: 2 }, Order { qty: 3, limit: 4 }])
            .unwrap();
        e.set_position(0).unwrap();

        assert_eq!(
            e.read_enum_list::<Side>().unwrap(),
            vec![Side::Buy, Side::Sell, Side::Buy]
        );
        assert_eq!(e.read_map::<String, String>().unwrap(), map);
        assert_eq!(
            e.read_list::<Order>().unwrap(),
            vec![Order { qty: 1, limit: 2 }, Order { qty: 3, limit: 4 }]
        );
    }

    #[test]
    fn parse_enum_with_stop_char() {
        let (_dir, mut e) = scratch_excerpt();
        e.start_excerpt(64).unwrap();
        e.write_bytes(b"Sell,rest,").unwrap();
        e.set_position(0).unwrap();
        let side: Side = e.parse_enum(|ch| ch == ',').unwrap();
        assert_eq!(side, Side::Sell);
        assert_eq!(e.parse_utf8(|ch| ch == ',').unwrap(), "rest");
    }
}
