use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::hash::Hash;
use std::marker::PhantomData;

// ========== Core pipeline traits ==========

pub trait Mapper {
    type Input: Send + 'static;
    type Key: Send + Serialize + DeserializeOwned + Hash + Eq + Clone + 'static;
    type Value: Send + Serialize + DeserializeOwned + Clone + 'static;

    fn do_map<I, F>(&self, input: I, emit: &mut F)
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value);
}

/// Partition-local fold applied between map and shuffle. The value type must
/// be closed under combination so the reducer accepts raw and combined records
/// alike; the fold may then run zero, one, or many times per key, on any
/// grouping of the values, without changing the reduced result.
pub trait Combiner {
    type Key: Send + Serialize + DeserializeOwned + Hash + Eq + Clone + 'static;
    type Value: Send + Serialize + DeserializeOwned + Clone + 'static;

    fn do_combine<I>(&self, key: &Self::Key, values: I) -> Self::Value
    where
        I: IntoIterator<Item = Self::Value>;
}

/// Reducer produces final output records per grouped key. The runtime writes
/// each emitted record as one line through its `Display` impl.
pub trait Reducer {
    type Key: Send + Serialize + DeserializeOwned + Hash + Eq + Clone + 'static;
    type ValueIn: Send + Serialize + DeserializeOwned + Clone + 'static;
    type Out: Send + Display + 'static;

    fn do_reduce<I, F>(&self, key: &Self::Key, values: I, emit: &mut F)
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out);
}

/// Marker combiner for pipelines that skip the combine stage entirely.
pub struct NoCombine<K, V>(PhantomData<fn() -> (K, V)>);

impl<K, V> Default for NoCombine<K, V> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K, V> Combiner for NoCombine<K, V>
where
    K: Send + Serialize + DeserializeOwned + Hash + Eq + Clone + 'static,
    V: Send + Serialize + DeserializeOwned + Clone + 'static,
{
    type Key = K;
    type Value = V;

    fn do_combine<I>(&self, _key: &Self::Key, _values: I) -> Self::Value
    where
        I: IntoIterator<Item = Self::Value>,
    {
        unreachable!("NoCombine is never invoked by the runtime")
    }
}
