//! [`Value`]: the object-graph type the keyed-archive codec encodes and
//! decodes to/from the wire.

/// A decoded (or to-be-encoded) keyed-archive object.
///
/// This mirrors the handful of Objective-C types `NSKeyedArchiver` actually
/// puts on the wire for DTX traffic: primitives, dates, ordered arrays,
/// ordered string-keyed dictionaries, and — for anything the registry
/// doesn't special-case — the raw class name plus its field dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `NSNull` / the archiver's `$null` marker.
    Null,
    /// A boxed `NSNumber` boolean.
    Bool(bool),
    /// A boxed `NSNumber` integer.
    Int(i64),
    /// A boxed `NSNumber` floating point value.
    Double(f64),
    /// An `NSString`.
    String(String),
    /// An `NSDate`, stored as seconds since the Mac absolute epoch
    /// (2001-01-01T00:00:00Z).
    Date(f64),
    /// An `NSArray`/`NSMutableArray`/`NSSet`.
    Array(Vec<Value>),
    /// An `NSDictionary`/`NSMutableDictionary`, order-preserving.
    Dict(Vec<(String, Value)>),
    /// Any other archived class this registry knows how to unwrap but not
    /// reconstruct natively: the class name plus its decoded field
    /// dictionary (or other body shape a registered decoder produced).
    Opaque {
        /// The archived Objective-C class name.
        class: String,
        /// The decoded body, as produced by the registered decoder.
        plist: Box<Value>,
    },
}

impl Value {
    /// Convenience accessor for the common "unwrap a dict field" case.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Dict(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Unwrap a [`Value::String`], if that's what this is.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Unwrap a [`Value::Int`], if that's what this is.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Unwrap a [`Value::Array`], if that's what this is.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}
