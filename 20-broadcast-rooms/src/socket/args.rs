use std::{fmt, sync::Arc};

use serde_json::Value;

/// Acknowledgement callback, invoked with the arguments of the reply.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(Vec<Value>) + Send + Sync>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: Vec<Value>) {
        (self.0)(args)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// A positional event argument: a JSON value, or a callback in the trailing
/// position.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Callback(Callback),
}

impl Arg {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        Arg::Callback(Callback::new(f))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(value) => Some(value),
            Arg::Callback(_) => None,
        }
    }

    pub(crate) fn into_value(self) -> Option<Value> {
        match self {
            Arg::Value(value) => Some(value),
            Arg::Callback(_) => None,
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Value(Value::from(value))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Value(Value::from(value))
    }
}

impl From<Callback> for Arg {
    fn from(callback: Callback) -> Self {
        Arg::Callback(callback)
    }
}

/// Arguments handed to an event subscriber.
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index).and_then(Arg::as_value)
    }

    /// The argument at `index` if it is a JSON string.
    pub fn str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    /// The trailing acknowledgement callback, if the sender asked for one.
    pub fn callback(&self) -> Option<&Callback> {
        match self.0.last() {
            Some(Arg::Callback(callback)) => Some(callback),
            _ => None,
        }
    }

    /// Replies through the trailing callback; a no-op when none was sent.
    pub fn ack(&self, args: Vec<Value>) {
        if let Some(callback) = self.callback() {
            callback.call(args);
        }
    }

    pub fn into_inner(self) -> Vec<Arg> {
        self.0
    }
}

impl From<Vec<Arg>> for Args {
    fn from(args: Vec<Arg>) -> Self {
        Self(args)
    }
}
