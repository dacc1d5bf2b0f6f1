//! Typed argument descriptors and the runtime values they carry.

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};

/// Wire type of a single argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentType {
    Int,
    Uint,
    /// Signed 24.8 fixed-point number.
    Fixed,
    String,
    Object,
    NewId,
    Array,
    /// Travels out of band on the transport's fd side-channel.
    FileDescriptor,
}

impl ArgumentType {
    /// Returns `true` for the types that may be declared nullable.
    pub fn supports_null(self) -> bool {
        matches!(
            self,
            ArgumentType::Object | ArgumentType::String | ArgumentType::Array
        )
    }

    /// Signature character used by the C-side `wl_message` tables.
    pub fn signature_char(self) -> char {
        match self {
            ArgumentType::Int => 'i',
            ArgumentType::Uint => 'u',
            ArgumentType::Fixed => 'f',
            ArgumentType::String => 's',
            ArgumentType::Object => 'o',
            ArgumentType::NewId => 'n',
            ArgumentType::Array => 'a',
            ArgumentType::FileDescriptor => 'h',
        }
    }
}

impl fmt::Display for ArgumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArgumentType::Int => "int",
            ArgumentType::Uint => "uint",
            ArgumentType::Fixed => "fixed",
            ArgumentType::String => "string",
            ArgumentType::Object => "object",
            ArgumentType::NewId => "new_id",
            ArgumentType::Array => "array",
            ArgumentType::FileDescriptor => "fd",
        };
        f.write_str(name)
    }
}

/// Signed 24.8 fixed-point value as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed(i32);

impl Fixed {
    /// Wraps a raw wire value (the real value times 256).
    pub const fn from_raw(raw: i32) -> Self {
        Fixed(raw)
    }

    pub const fn from_int(value: i32) -> Self {
        Fixed(value << 8)
    }

    /// Rounds to the nearest representable value.
    pub fn from_f64(value: f64) -> Self {
        Fixed((value * 256.0).round() as i32)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / 256.0
    }

    /// Integer part, truncated toward zero.
    pub const fn to_int(self) -> i32 {
        self.0 / 256
    }
}

impl From<i32> for Fixed {
    fn from(value: i32) -> Self {
        Fixed::from_int(value)
    }
}

impl From<f64> for Fixed {
    fn from(value: f64) -> Self {
        Fixed::from_f64(value)
    }
}

/// Schema-level description of one argument of a request or event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub kind: ArgumentType,
    /// Interface an Object/NewId argument is bound to, by name.  `None` on a
    /// NewId means the interface is chosen by the caller at send time.
    pub interface: Option<String>,
    pub nullable: bool,
}

impl Argument {
    pub fn new(kind: ArgumentType) -> Self {
        Self {
            kind,
            interface: None,
            nullable: false,
        }
    }

    pub fn int() -> Self {
        Self::new(ArgumentType::Int)
    }

    pub fn uint() -> Self {
        Self::new(ArgumentType::Uint)
    }

    pub fn fixed() -> Self {
        Self::new(ArgumentType::Fixed)
    }

    pub fn string() -> Self {
        Self::new(ArgumentType::String)
    }

    pub fn array() -> Self {
        Self::new(ArgumentType::Array)
    }

    pub fn fd() -> Self {
        Self::new(ArgumentType::FileDescriptor)
    }

    pub fn object(interface: &str) -> Self {
        Self::new(ArgumentType::Object).with_interface(interface)
    }

    pub fn new_id(interface: &str) -> Self {
        Self::new(ArgumentType::NewId).with_interface(interface)
    }

    /// A NewId whose interface is supplied at call time (`wl_registry.bind`).
    pub fn untyped_new_id() -> Self {
        Self::new(ArgumentType::NewId)
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Returns `true` for a NewId with no bound interface, which occupies
    /// three wire slots (name, version, id) instead of one.
    pub fn is_untyped_new_id(&self) -> bool {
        self.kind == ArgumentType::NewId && self.interface.is_none()
    }

    /// Checks that `value` has the shape this argument declares.
    ///
    /// Returns a human-readable reason on failure; the codec wraps it into
    /// [`crate::WireError::ArgumentMismatch`].
    pub fn check(&self, value: &ArgValue) -> Result<(), String> {
        let shape_ok = match (self.kind, value) {
            (ArgumentType::Int, ArgValue::Int(_))
            | (ArgumentType::Uint, ArgValue::Uint(_))
            | (ArgumentType::Fixed, ArgValue::Fixed(_))
            | (ArgumentType::String, ArgValue::String(_))
            | (ArgumentType::Object, ArgValue::Object(_))
            | (ArgumentType::Array, ArgValue::Array(_))
            | (ArgumentType::FileDescriptor, ArgValue::Fd(_)) => true,
            (ArgumentType::NewId, ArgValue::NewId(_)) => self.interface.is_some(),
            (ArgumentType::NewId, ArgValue::UntypedNewId { .. }) => self.interface.is_none(),
            _ => false,
        };
        if !shape_ok {
            return Err(format!("expected {}, got {}", self.describe(), value.describe()));
        }
        if value.is_null() && !self.nullable {
            return Err(format!("null passed for non-nullable {}", self.kind));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match (&self.interface, self.kind) {
            (Some(iface), _) => format!("{}<{iface}>", self.kind),
            (None, ArgumentType::NewId) => "new_id<any>".to_string(),
            (None, kind) => kind.to_string(),
        }
    }
}

/// A decoded or to-be-encoded argument value.
#[derive(Debug)]
pub enum ArgValue {
    Int(i32),
    Uint(u32),
    Fixed(Fixed),
    String(Option<String>),
    /// Object id; `None` is the null object (id 0 on the wire).
    Object(Option<u32>),
    NewId(u32),
    /// NewId whose interface travels inline.
    UntypedNewId {
        interface: String,
        version: u32,
        id: u32,
    },
    /// The wire has no separate null array: `None` and an empty array both
    /// encode as length 0.  A nullable slot decodes length 0 as `None`, a
    /// non-nullable one as `Some(vec![])`.
    Array(Option<Vec<u8>>),
    Fd(OwnedFd),
}

impl ArgValue {
    pub fn string(value: impl Into<String>) -> Self {
        ArgValue::String(Some(value.into()))
    }

    pub fn object(id: u32) -> Self {
        ArgValue::Object(Some(id))
    }

    pub fn array(bytes: impl Into<Vec<u8>>) -> Self {
        ArgValue::Array(Some(bytes.into()))
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            ArgValue::String(None) | ArgValue::Object(None) | ArgValue::Array(None)
        )
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            ArgValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_fixed(&self) -> Option<Fixed> {
        match self {
            ArgValue::Fixed(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<u32> {
        match self {
            ArgValue::Object(id) => *id,
            _ => None,
        }
    }

    /// Id of a typed or untyped NewId.
    pub fn as_new_id(&self) -> Option<u32> {
        match self {
            ArgValue::NewId(id) | ArgValue::UntypedNewId { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[u8]> {
        match self {
            ArgValue::Array(Some(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Takes ownership of a file descriptor value.
    pub fn into_fd(self) -> Option<OwnedFd> {
        match self {
            ArgValue::Fd(fd) => Some(fd),
            _ => None,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ArgValue::Int(_) => "int",
            ArgValue::Uint(_) => "uint",
            ArgValue::Fixed(_) => "fixed",
            ArgValue::String(_) => "string",
            ArgValue::Object(_) => "object",
            ArgValue::NewId(_) => "new_id",
            ArgValue::UntypedNewId { .. } => "new_id<any>",
            ArgValue::Array(_) => "array",
            ArgValue::Fd(_) => "fd",
        }
    }
}

/// File descriptors compare by descriptor number.
impl PartialEq for ArgValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ArgValue::Int(a), ArgValue::Int(b)) => a == b,
            (ArgValue::Uint(a), ArgValue::Uint(b)) => a == b,
            (ArgValue::Fixed(a), ArgValue::Fixed(b)) => a == b,
            (ArgValue::String(a), ArgValue::String(b)) => a == b,
            (ArgValue::Object(a), ArgValue::Object(b)) => a == b,
            (ArgValue::NewId(a), ArgValue::NewId(b)) => a == b,
            (
                ArgValue::UntypedNewId {
                    interface: ia,
                    version: va,
                    id: a,
                },
                ArgValue::UntypedNewId {
                    interface: ib,
                    version: vb,
                    id: b,
                },
            ) => ia == ib && va == vb && a == b,
            (ArgValue::Array(a), ArgValue::Array(b)) => a == b,
            (ArgValue::Fd(a), ArgValue::Fd(b)) => a.as_raw_fd() == b.as_raw_fd(),
            _ => false,
        }
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Int(v)
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        ArgValue::Uint(v)
    }
}

impl From<Fixed> for ArgValue {
    fn from(v: Fixed) -> Self {
        ArgValue::Fixed(v)
    }
}

impl From<OwnedFd> for ArgValue {
    fn from(fd: OwnedFd) -> Self {
        ArgValue::Fd(fd)
    }
}
