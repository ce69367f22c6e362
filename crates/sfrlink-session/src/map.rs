use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SessionError};

/// Largest register map file [`RegisterMap::from_file`] will read.
pub const MAX_MAP_FILE_SIZE: usize = 1024 * 1024;

/// Built-in map for the ATmega32U4 (Arduino Leonardo).
pub const ATMEGA32U4: &str = include_str!("../maps/atmega32u4.json");

/// Register width in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Width {
    Bits8,
    Bits16,
}

impl Width {
    pub fn bits(self) -> u8 {
        match self {
            Self::Bits8 => 8,
            Self::Bits16 => 16,
        }
    }

    /// Largest value a register of this width holds.
    pub fn max_value(self) -> u16 {
        match self {
            Self::Bits8 => 0xFF,
            Self::Bits16 => 0xFFFF,
        }
    }

    /// Value bytes carried on the wire.
    pub fn byte_len(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
        }
    }
}

impl TryFrom<u8> for Width {
    type Error = String;

    fn try_from(bits: u8) -> std::result::Result<Self, Self::Error> {
        match bits {
            8 => Ok(Self::Bits8),
            16 => Ok(Self::Bits16),
            other => Err(format!("unsupported register width {other} (expected 8 or 16)")),
        }
    }
}

impl From<Width> for u8 {
    fn from(width: Width) -> Self {
        width.bits()
    }
}

/// Which address space a register lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSpace {
    Io,
    Mem,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => f.write_str("io"),
            Self::Mem => f.write_str("mem"),
        }
    }
}

/// A named special function register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    pub name: String,
    pub address: u16,
    pub width: Width,
    pub space: AddressSpace,
}

impl RegisterDescriptor {
    pub fn new(name: impl Into<String>, address: u16, width: Width, space: AddressSpace) -> Self {
        Self {
            name: name.into(),
            address,
            width,
            space,
        }
    }

    /// Address byte sent on the wire.
    pub fn wire_address(&self) -> u8 {
        self.address.to_le_bytes()[0]
    }
}

/// One entry in the symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Register(RegisterDescriptor),
    /// Another name for a register; holds a copy of the target's descriptor.
    Alias {
        target: String,
        register: RegisterDescriptor,
    },
    /// A `#define`d number, or a bare `#define NAME` with no value.
    Constant(Option<i64>),
    /// Interrupt vector index.
    Vector(u8),
}

impl Symbol {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Alias { .. } => "alias",
            Self::Constant(_) => "constant",
            Self::Vector(_) => "vector",
        }
    }

    /// The register this symbol reads and writes, if any.
    pub fn register(&self) -> Option<&RegisterDescriptor> {
        match self {
            Self::Register(register) | Self::Alias { register, .. } => Some(register),
            Self::Constant(_) | Self::Vector(_) => None,
        }
    }
}

/// Serialized form of a register map.
///
/// ```json
/// {
///   "registers": [{"name": "DDRB", "address": 4, "width": 8, "space": "io"}],
///   "aliases": {"LED_DDR": "DDRB"},
///   "constants": {"DDB5": 5, "__AVR_ATmega32U4__": null},
///   "vectors": {"INT0_vect": 1}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegisterMapDefinition {
    pub registers: Vec<RegisterDescriptor>,
    pub aliases: BTreeMap<String, String>,
    pub constants: BTreeMap<String, Option<i64>>,
    pub vectors: BTreeMap<String, u8>,
}

/// Name-keyed table of registers, aliases, constants, and interrupt vectors.
///
/// Names are unique across every kind. Registers and vectors are fixed once
/// inserted; aliases and constants can be redefined or removed.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    symbols: HashMap<String, Symbol>,
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from its serialized definition.
    ///
    /// Aliases may point at other aliases; they are resolved in dependency
    /// order regardless of how they appear in the document.
    pub fn from_definition(definition: RegisterMapDefinition) -> Result<Self> {
        let mut map = Self::new();
        for register in definition.registers {
            map.insert_register(register)?;
        }
        for (name, index) in definition.vectors {
            map.insert_vector(name, index)?;
        }
        for (name, value) in definition.constants {
            map.insert_fixed(name, Symbol::Constant(value))?;
        }

        let mut pending: Vec<(String, String)> = definition.aliases.into_iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut unresolved = Vec::new();
            for (name, target) in pending {
                if map.symbols.contains_key(&target) {
                    map.define_alias(&name, &target)?;
                } else {
                    unresolved.push((name, target));
                }
            }
            if unresolved.len() == before {
                let detail = unresolved
                    .iter()
                    .map(|(name, target)| format!("{name} -> {target}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(SessionError::Definition(format!(
                    "aliases target undefined names: {detail}"
                )));
            }
            pending = unresolved;
        }

        debug!(symbols = map.len(), "register map loaded");
        Ok(map)
    }

    /// Parse a JSON [`RegisterMapDefinition`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let definition: RegisterMapDefinition = serde_json::from_str(json)?;
        Self::from_definition(definition)
    }

    /// The built-in [`ATMEGA32U4`] map.
    pub fn atmega32u4() -> Result<Self> {
        Self::from_json_str(ATMEGA32U4)
    }

    /// Load a JSON register map from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|err| SessionError::Definition(format!("{}: {err}", path.display())))?;

        let read_limit = u64::try_from(MAX_MAP_FILE_SIZE.saturating_add(1)).unwrap_or(u64::MAX);
        let mut content = String::new();
        file.take(read_limit)
            .read_to_string(&mut content)
            .map_err(|err| SessionError::Definition(format!("{}: {err}", path.display())))?;
        if content.len() > MAX_MAP_FILE_SIZE {
            return Err(SessionError::Definition(format!(
                "{}: file exceeds {MAX_MAP_FILE_SIZE} bytes",
                path.display()
            )));
        }

        Self::from_json_str(&content)
    }

    /// Serialize the map back into its definition form.
    pub fn to_definition(&self) -> RegisterMapDefinition {
        let mut definition = RegisterMapDefinition::default();
        for (name, symbol) in &self.symbols {
            match symbol {
                Symbol::Register(register) => definition.registers.push(register.clone()),
                // The copied descriptor, not the possibly redefined target.
                Symbol::Alias { register, .. } => {
                    definition.aliases.insert(name.clone(), register.name.clone());
                }
                Symbol::Constant(value) => {
                    definition.constants.insert(name.clone(), *value);
                }
                Symbol::Vector(index) => {
                    definition.vectors.insert(name.clone(), *index);
                }
            }
        }
        definition.registers.sort_by(|a, b| a.name.cmp(&b.name));
        definition
    }

    /// Add a register. Fails if the name is already in use.
    pub fn insert_register(&mut self, register: RegisterDescriptor) -> Result<()> {
        if register.address > 0xFF {
            warn!(
                name = %register.name,
                address = register.address,
                "register address wider than one byte, only the low byte is sent"
            );
        }
        let name = register.name.clone();
        self.insert_fixed(name, Symbol::Register(register))
    }

    /// Add an interrupt vector. Fails if the name is already in use.
    pub fn insert_vector(&mut self, name: impl Into<String>, index: u8) -> Result<()> {
        self.insert_fixed(name.into(), Symbol::Vector(index))
    }

    /// Make `name` another name for the register behind `target`.
    ///
    /// `target` may itself be an alias. An existing alias or constant called
    /// `name` is replaced.
    pub fn define_alias(&mut self, name: &str, target: &str) -> Result<()> {
        let register = self.resolve_register(target)?;
        self.define(
            name,
            Symbol::Alias {
                target: target.to_string(),
                register,
            },
        )
    }

    /// Define a constant. An existing alias or constant called `name` is
    /// replaced.
    pub fn define_constant(&mut self, name: &str, value: Option<i64>) -> Result<()> {
        self.define(name, Symbol::Constant(value))
    }

    /// Remove an alias or constant. Registers and vectors are never removed.
    ///
    /// Returns whether anything was removed.
    pub fn undefine(&mut self, name: &str) -> bool {
        match self.symbols.get(name) {
            Some(Symbol::Alias { .. } | Symbol::Constant(_)) => {
                self.symbols.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Look up a register or alias and copy its descriptor out.
    pub fn resolve_register(&self, name: &str) -> Result<RegisterDescriptor> {
        match self.symbols.get(name) {
            Some(symbol) => symbol
                .register()
                .cloned()
                .ok_or_else(|| SessionError::NotARegister(name.to_string())),
            None => Err(SessionError::UnknownName(name.to_string())),
        }
    }

    /// Value of a constant.
    pub fn constant(&self, name: &str) -> Result<Option<i64>> {
        match self.symbols.get(name) {
            Some(Symbol::Constant(value)) => Ok(*value),
            Some(_) => Err(SessionError::NotAConstant(name.to_string())),
            None => Err(SessionError::UnknownName(name.to_string())),
        }
    }

    /// Index of an interrupt vector.
    pub fn vector(&self, name: &str) -> Result<u8> {
        match self.symbols.get(name) {
            Some(Symbol::Vector(index)) => Ok(*index),
            Some(_) => Err(SessionError::NotAVector(name.to_string())),
            None => Err(SessionError::UnknownName(name.to_string())),
        }
    }

    /// Names of every vector using `index`, sorted.
    pub fn vector_names(&self, index: u8) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .symbols
            .iter()
            .filter(|(_, symbol)| matches!(symbol, Symbol::Vector(i) if *i == index))
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// All vectors as `(name, index)`, ordered by index then name.
    pub fn vectors(&self) -> Vec<(&str, u8)> {
        let mut vectors: Vec<(&str, u8)> = self
            .symbols
            .iter()
            .filter_map(|(name, symbol)| match symbol {
                Symbol::Vector(index) => Some((name.as_str(), *index)),
                _ => None,
            })
            .collect();
        vectors.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        vectors
    }

    /// True for registers and aliases.
    pub fn is_register(&self, name: &str) -> bool {
        self.symbols.get(name).is_some_and(|s| s.register().is_some())
    }

    pub fn is_constant(&self, name: &str) -> bool {
        matches!(self.symbols.get(name), Some(Symbol::Constant(_)))
    }

    pub fn is_vector(&self, name: &str) -> bool {
        matches!(self.symbols.get(name), Some(Symbol::Vector(_)))
    }

    /// `#if defined(NAME)`: true for registers, aliases, and constants.
    pub fn defined(&self, name: &str) -> bool {
        self.is_register(name) || self.is_constant(name)
    }

    /// All symbols sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Symbol)> {
        let mut entries: Vec<(&str, &Symbol)> = self
            .symbols
            .iter()
            .map(|(name, symbol)| (name.as_str(), symbol))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Firmware ISR stubs that forward every vector to the host, one per
    /// line, ordered by vector index.
    pub fn firmware_isrs(&self) -> String {
        self.vectors()
            .into_iter()
            .map(|(name, index)| format!("ISR({name}) {{ triggerInterrupt({index}); }}\n"))
            .collect()
    }

    fn insert_fixed(&mut self, name: String, symbol: Symbol) -> Result<()> {
        if self.symbols.contains_key(&name) {
            return Err(SessionError::DuplicateName(name));
        }
        self.symbols.insert(name, symbol);
        Ok(())
    }

    fn define(&mut self, name: &str, symbol: Symbol) -> Result<()> {
        match self.symbols.get(name) {
            Some(Symbol::Register(_) | Symbol::Vector(_)) => {
                Err(SessionError::DuplicateName(name.to_string()))
            }
            _ => {
                self.symbols.insert(name.to_string(), symbol);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "registers": [
            {"name": "DDRB", "address": 4, "width": 8, "space": "io"},
            {"name": "PORTB", "address": 5, "width": 8, "space": "io"},
            {"name": "TCNT1", "address": 132, "width": 16, "space": "mem"}
        ],
        "aliases": {"LED_PORT": "PORTB", "STATUS_LED": "LED_PORT"},
        "constants": {"DDB5": 5, "__AVR_ATmega32U4__": null},
        "vectors": {"INT0_vect": 1, "TIMER1_OVF_vect": 20}
    }"#;

    fn sample() -> RegisterMap {
        RegisterMap::from_json_str(SAMPLE).unwrap()
    }

    #[test]
    fn loads_every_kind() {
        let map = sample();
        assert_eq!(map.len(), 9);

        let ddrb = map.resolve_register("DDRB").unwrap();
        assert_eq!(ddrb.address, 0x04);
        assert_eq!(ddrb.width, Width::Bits8);
        assert_eq!(ddrb.space, AddressSpace::Io);

        let tcnt1 = map.resolve_register("TCNT1").unwrap();
        assert_eq!(tcnt1.width, Width::Bits16);
        assert_eq!(tcnt1.space, AddressSpace::Mem);

        assert_eq!(map.constant("DDB5").unwrap(), Some(5));
        assert_eq!(map.constant("__AVR_ATmega32U4__").unwrap(), None);
        assert_eq!(map.vector("INT0_vect").unwrap(), 1);
    }

    #[test]
    fn chained_aliases_resolve_to_target() {
        let map = sample();
        let portb = map.resolve_register("PORTB").unwrap();
        assert_eq!(map.resolve_register("LED_PORT").unwrap(), portb);
        assert_eq!(map.resolve_register("STATUS_LED").unwrap(), portb);
    }

    #[test]
    fn dangling_alias_is_rejected() {
        let err = RegisterMap::from_json_str(r#"{"aliases": {"A": "NOPE"}}"#).unwrap_err();
        assert!(matches!(err, SessionError::Definition(_)));
    }

    #[test]
    fn bad_width_is_rejected() {
        let err = RegisterMap::from_json_str(
            r#"{"registers": [{"name": "X", "address": 1, "width": 32, "space": "io"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::InvalidJson(_)));
    }

    #[test]
    fn names_are_unique_across_kinds() {
        let mut map = sample();
        let err = map
            .insert_register(RegisterDescriptor::new(
                "INT0_vect",
                9,
                Width::Bits8,
                AddressSpace::Io,
            ))
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateName(_)));

        assert!(matches!(
            map.define_constant("DDRB", Some(1)),
            Err(SessionError::DuplicateName(_))
        ));
        assert!(matches!(
            map.define_alias("INT0_vect", "DDRB"),
            Err(SessionError::DuplicateName(_))
        ));
    }

    #[test]
    fn aliases_and_constants_can_be_redefined() {
        let mut map = sample();
        map.define_alias("LED_PORT", "DDRB").unwrap();
        assert_eq!(map.resolve_register("LED_PORT").unwrap().name, "DDRB");

        map.define_constant("LED_PORT", Some(3)).unwrap();
        assert_eq!(map.constant("LED_PORT").unwrap(), Some(3));
    }

    #[test]
    fn undefine_only_touches_aliases_and_constants() {
        let mut map = sample();
        assert!(map.undefine("DDB5"));
        assert!(map.undefine("LED_PORT"));
        assert!(!map.undefine("DDRB"));
        assert!(!map.undefine("INT0_vect"));
        assert!(!map.undefine("MISSING"));

        assert!(!map.defined("DDB5"));
        assert!(map.defined("DDRB"));
        // Aliases hold a copy, so removing an intermediate leaves dependents intact.
        assert!(map.is_register("STATUS_LED"));
    }

    #[test]
    fn kind_checks() {
        let map = sample();
        assert!(map.is_register("DDRB"));
        assert!(map.is_register("LED_PORT"));
        assert!(map.is_constant("DDB5"));
        assert!(map.is_vector("INT0_vect"));
        assert!(!map.defined("INT0_vect"));
        assert!(!map.defined("MISSING"));

        assert!(matches!(
            map.resolve_register("DDB5"),
            Err(SessionError::NotARegister(_))
        ));
        assert!(matches!(
            map.vector("DDRB"),
            Err(SessionError::NotAVector(_))
        ));
        assert!(matches!(
            map.constant("MISSING"),
            Err(SessionError::UnknownName(_))
        ));
    }

    #[test]
    fn firmware_isrs_sorted_by_index() {
        let map = sample();
        assert_eq!(
            map.firmware_isrs(),
            "ISR(INT0_vect) { triggerInterrupt(1); }\n\
             ISR(TIMER1_OVF_vect) { triggerInterrupt(20); }\n"
        );
    }

    #[test]
    fn definition_roundtrips() {
        let map = sample();
        let again = RegisterMap::from_definition(map.to_definition()).unwrap();
        assert_eq!(again.len(), map.len());
        assert_eq!(
            again.resolve_register("STATUS_LED").unwrap(),
            map.resolve_register("STATUS_LED").unwrap()
        );
    }

    #[test]
    fn definition_keeps_aliases_after_intermediate_redefined() {
        let mut map = sample();
        map.define_alias("LED_PORT", "DDRB").unwrap();

        let again = RegisterMap::from_definition(map.to_definition()).unwrap();
        assert_eq!(again.resolve_register("STATUS_LED").unwrap().name, "PORTB");
        assert_eq!(again.resolve_register("LED_PORT").unwrap().name, "DDRB");
    }

    #[test]
    fn definition_keeps_aliases_after_intermediate_undefined() {
        let mut map = sample();
        assert!(map.undefine("LED_PORT"));

        let again = RegisterMap::from_definition(map.to_definition()).unwrap();
        assert_eq!(again.resolve_register("STATUS_LED").unwrap().name, "PORTB");
        assert!(!again.defined("LED_PORT"));
    }

    #[test]
    fn wire_address_is_low_byte() {
        let register = RegisterDescriptor::new("FAR", 0x1C4, Width::Bits8, AddressSpace::Mem);
        assert_eq!(register.wire_address(), 0xC4);
    }

    #[test]
    fn builtin_atmega32u4_map_loads() {
        let map = RegisterMap::atmega32u4().unwrap();
        assert_eq!(map.resolve_register("DDRB").unwrap().address, 0x04);
        assert_eq!(map.resolve_register("ADCW").unwrap().width, Width::Bits16);
        assert_eq!(map.vector("INT0_vect").unwrap(), 1);
        assert!(map.firmware_isrs().starts_with("ISR(INT0_vect) { triggerInterrupt(1); }\n"));
    }

    #[test]
    fn from_file_reads_json() {
        let path = std::env::temp_dir().join(format!("sfrlink-map-{}.json", std::process::id()));
        std::fs::write(&path, SAMPLE).unwrap();
        let map = RegisterMap::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(map.len(), 9);
    }

    #[test]
    fn from_file_rejects_missing_path() {
        let err = RegisterMap::from_file(Path::new("/nonexistent/sfrlink-map.json")).unwrap_err();
        assert!(matches!(err, SessionError::Definition(_)));
    }
}
