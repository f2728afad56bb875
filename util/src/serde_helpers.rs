use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use serde::de::{Error, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn load_json_from_file<T, P>(path: P) -> Result<T>
where
    for<'de> T: Deserialize<'de>,
    P: AsRef<Path>,
{
    let data = std::fs::read_to_string(path)?;
    let de = &mut serde_json::Deserializer::from_str(&data);
    serde_path_to_error::deserialize(de).map_err(Into::into)
}

pub fn save_json_to_file<T, P>(value: &T, path: P) -> Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let data = serde_json::to_string_pretty(value)?;
    std::fs::write(path, data)?;
    Ok(())
}

/// (De)serializes durations as human readable strings (`"500ms"`, `"1m 30s"`).
pub mod humantime {
    use std::time::Duration;

    use super::*;

    pub fn serialize<T, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        for<'a> Serde<&'a T>: Serialize,
    {
        Serde::from(value).serialize(serializer)
    }

    pub fn deserialize<'a, T, D: Deserializer<'a>>(deserializer: D) -> Result<T, D::Error>
    where
        Serde<T>: Deserialize<'a>,
    {
        Serde::deserialize(deserializer).map(Serde::into_inner)
    }

    pub struct Serde<T>(T);

    impl<T> Serde<T> {
        #[inline]
        pub fn into_inner(self) -> T {
            self.0
        }
    }

    impl<T> From<T> for Serde<T> {
        fn from(value: T) -> Serde<T> {
            Serde(value)
        }
    }

    impl<'de> Deserialize<'de> for Serde<Duration> {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Serde<Duration>, D::Error> {
            struct V;

            impl Visitor<'_> for V {
                type Value = Duration;

                fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str("a duration")
                }

                fn visit_str<E: Error>(self, v: &str) -> Result<Duration, E> {
                    ::humantime::parse_duration(v)
                        .map_err(|_e| E::invalid_value(serde::de::Unexpected::Str(v), &self))
                }
            }

            d.deserialize_str(V).map(Serde)
        }
    }

    impl<'de> Deserialize<'de> for Serde<Option<Duration>> {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Serde<Option<Duration>>, D::Error> {
            match Option::<Serde<Duration>>::deserialize(d)? {
                Some(Serde(v)) => Ok(Serde(Some(v))),
                None => Ok(Serde(None)),
            }
        }
    }

    impl Serialize for Serde<&Duration> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(&::humantime::format_duration(*self.0))
        }
    }

    impl Serialize for Serde<Duration> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            Serde(&self.0).serialize(serializer)
        }
    }

    impl Serialize for Serde<&Option<Duration>> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match *self.0 {
                Some(v) => serializer.serialize_some(&Serde(v)),
                None => serializer.serialize_none(),
            }
        }
    }
}

pub struct StrVisitor<S>(PhantomData<S>);

impl<S> StrVisitor<S> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for StrVisitor<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FromStr> Visitor<'_> for StrVisitor<S>
where
    <S as FromStr>::Err: std::fmt::Display,
{
    type Value = S;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a string")
    }

    fn visit_str<E: Error>(self, value: &str) -> Result<Self::Value, E> {
        value.parse::<Self::Value>().map_err(Error::custom)
    }
}
