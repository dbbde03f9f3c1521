//! Type-erased handlers and the conversions that feed them.
//!
//! Any `Fn` taking up to four parameters can be registered on a topic. Each
//! parameter type must be decodable from a [`Value`] and have a `Default`,
//! which stands in for the parameter whenever the published argument is
//! `null`. The return type decides how many reply values the handler yields,
//! see [`IntoReturn`].

use std::any::{Any, TypeId, type_name};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::InvokeError;

type Invoker = Box<dyn Fn(Vec<Value>) -> Result<Vec<Value>, InvokeError> + Send + Sync>;

/// Declared parameter and return types of a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    params: Vec<&'static str>,
    returns: &'static str,
}

impl Signature {
    fn new(params: Vec<&'static str>, returns: &'static str) -> Self {
        Self { params, returns }
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Parameter type names, in positional order.
    #[must_use]
    pub fn params(&self) -> &[&'static str] {
        &self.params
    }

    /// Return type name.
    #[must_use]
    pub fn returns(&self) -> &'static str {
        self.returns
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn({}) -> {}", self.params.join(", "), self.returns)
    }
}

/// Identity of a registered callable.
///
/// Two keys are equal when they were derived from the same callable type with
/// the same signature. Every function item has its own type, so a function
/// always matches itself. Closures match when they come from the same closure
/// expression, whatever state they captured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    callable: TypeId,
    signature: Signature,
}

impl HandlerKey {
    fn of<F: 'static>(signature: Signature) -> Self {
        Self {
            callable: TypeId::of::<F>(),
            signature,
        }
    }

    /// The declared signature this key was derived from.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// Conversion of a handler's return value into its reply values.
///
/// `()` produces no values, tuples of two or three produce one value per
/// element, everything else produces exactly one. Wrap custom serializable
/// types in [`Reply`].
pub trait IntoReturn {
    /// Encode the return value.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Return`] if a value cannot be serialized.
    fn into_return(self) -> Result<Vec<Value>, InvokeError>;
}

/// Single serializable return value of any type.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T>(pub T);

fn encode<T: Serialize>(value: T) -> Result<Value, InvokeError> {
    serde_json::to_value(value).map_err(|e| InvokeError::Return {
        message: e.to_string(),
    })
}

impl IntoReturn for () {
    fn into_return(self) -> Result<Vec<Value>, InvokeError> {
        Ok(Vec::new())
    }
}

macro_rules! impl_single_return {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReturn for $ty {
                fn into_return(self) -> Result<Vec<Value>, InvokeError> {
                    Ok(vec![encode(self)?])
                }
            }
        )*
    };
}

impl_single_return!(
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    &'static str,
    Value,
);

impl<T: Serialize> IntoReturn for Vec<T> {
    fn into_return(self) -> Result<Vec<Value>, InvokeError> {
        Ok(vec![encode(self)?])
    }
}

impl<T: Serialize> IntoReturn for Option<T> {
    fn into_return(self) -> Result<Vec<Value>, InvokeError> {
        Ok(vec![encode(self)?])
    }
}

impl<T: Serialize> IntoReturn for HashMap<String, T> {
    fn into_return(self) -> Result<Vec<Value>, InvokeError> {
        Ok(vec![encode(self)?])
    }
}

impl<T: Serialize> IntoReturn for BTreeMap<String, T> {
    fn into_return(self) -> Result<Vec<Value>, InvokeError> {
        Ok(vec![encode(self)?])
    }
}

impl<T: Serialize> IntoReturn for Reply<T> {
    fn into_return(self) -> Result<Vec<Value>, InvokeError> {
        Ok(vec![encode(self.0)?])
    }
}

impl<A: Serialize, B: Serialize> IntoReturn for (A, B) {
    fn into_return(self) -> Result<Vec<Value>, InvokeError> {
        Ok(vec![encode(self.0)?, encode(self.1)?])
    }
}

impl<A: Serialize, B: Serialize, C: Serialize> IntoReturn for (A, B, C) {
    fn into_return(self) -> Result<Vec<Value>, InvokeError> {
        Ok(vec![encode(self.0)?, encode(self.1)?, encode(self.2)?])
    }
}

/// Decode one positional argument, substituting the zero value for `null`.
fn decode_arg<T>(index: usize, value: Value) -> Result<T, InvokeError>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value).map_err(|e| InvokeError::Argument {
        index,
        expected: type_name::<T>(),
        message: e.to_string(),
    })
}

/// Callables that can be registered as handlers.
///
/// Implemented for every `Fn` of up to four parameters whose parameters are
/// `DeserializeOwned + Default` and whose return type implements
/// [`IntoReturn`]. `Marker` only disambiguates the arity and is inferred.
pub trait IntoHandler<Marker>: Send + Sync + Sized + 'static {
    /// Identity key used to find this callable again on unsubscribe.
    fn key(&self) -> HandlerKey;

    /// Erase the callable into a [`Handler`].
    fn into_handler(self) -> Handler;
}

macro_rules! impl_into_handler {
    ($arity:literal $(, $param:ident : $index:literal)*) => {
        impl<F, R, $($param,)*> IntoHandler<fn($($param,)*) -> R> for F
        where
            F: Fn($($param),*) -> R + Send + Sync + 'static,
            R: IntoReturn + 'static,
            $($param: DeserializeOwned + Default + 'static,)*
        {
            fn key(&self) -> HandlerKey {
                HandlerKey::of::<F>(Signature::new(
                    vec![$(type_name::<$param>()),*],
                    type_name::<R>(),
                ))
            }

            #[allow(non_snake_case)]
            fn into_handler(self) -> Handler {
                let key = <Self as IntoHandler<fn($($param,)*) -> R>>::key(&self);
                let callable = self;
                Handler::from_invoker(
                    key,
                    Box::new(move |args: Vec<Value>| {
                        let found = args.len();
                        let [$($param),*]: [Value; $arity] =
                            args.try_into().map_err(|_| InvokeError::Arity {
                                expected: $arity,
                                found,
                            })?;
                        $(let $param = decode_arg::<$param>($index, $param)?;)*
                        callable($($param),*).into_return()
                    }),
                )
            }
        }
    };
}

impl_into_handler!(0);
impl_into_handler!(1, A0: 0);
impl_into_handler!(2, A0: 0, A1: 1);
impl_into_handler!(3, A0: 0, A1: 1, A2: 2);
impl_into_handler!(4, A0: 0, A1: 1, A2: 2, A3: 3);

/// One registered callable.
///
/// Each handler carries a private mutex. When the handler is marked
/// [`serial`](Handler::serial) every invocation holds it, so repeated
/// publishes never run that handler concurrently with itself. Other
/// handlers are unaffected.
pub struct Handler {
    key: HandlerKey,
    serial: bool,
    lock: Mutex<()>,
    invoker: Invoker,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("signature", &self.key.signature.to_string())
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl Handler {
    /// Erase a callable into a handler.
    pub fn new<F, M>(callable: F) -> Self
    where
        F: IntoHandler<M>,
    {
        callable.into_handler()
    }

    fn from_invoker(key: HandlerKey, invoker: Invoker) -> Self {
        Self {
            key,
            serial: false,
            lock: Mutex::new(()),
            invoker,
        }
    }

    /// Serialize invocations of this handler.
    #[must_use]
    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    /// Whether invocations are serialized.
    #[must_use]
    pub fn is_serial(&self) -> bool {
        self.serial
    }

    /// Identity key of the wrapped callable.
    #[must_use]
    pub fn key(&self) -> &HandlerKey {
        &self.key
    }

    /// Declared signature of the wrapped callable.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.key.signature
    }

    /// Invoke the handler with positional arguments.
    ///
    /// Panics inside the callable are caught and reported as
    /// [`InvokeError::Panicked`].
    ///
    /// # Errors
    ///
    /// Returns an [`InvokeError`] when the arguments do not fit the declared
    /// parameters, a return value cannot be encoded, or the callable panics.
    pub fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>, InvokeError> {
        let _serial = self
            .serial
            .then(|| self.lock.lock().unwrap_or_else(PoisonError::into_inner));

        catch_unwind(AssertUnwindSafe(|| (self.invoker)(args))).unwrap_or_else(|payload| {
            Err(InvokeError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
