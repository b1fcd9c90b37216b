use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Object metadata. Adapters own `uid`, `resource_version`, `generation` and
/// `creation_ts`; callers only set name, labels and annotations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default)]
    pub generation: i64,
    /// Seconds since epoch.
    #[serde(default)]
    pub creation_ts: i64,
    #[serde(default, with = "string_map")]
    pub labels: SmallVec<[(String, String); 8]>,
    #[serde(default, with = "string_map")]
    pub annotations: SmallVec<[(String, String); 4]>,
}

impl ObjectMeta {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Labels and annotations travel as `{key: value}` maps and are kept as
/// ordered pairs in memory.
mod string_map {
    use std::fmt;
    use std::marker::PhantomData;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use smallvec::{Array, SmallVec};

    pub fn serialize<A, S>(pairs: &SmallVec<A>, s: S) -> Result<S::Ok, S::Error>
    where
        A: Array<Item = (String, String)>,
        S: Serializer,
    {
        let mut map = s.serialize_map(Some(pairs.len()))?;
        for (k, v) in pairs.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }

    pub fn deserialize<'de, A, D>(d: D) -> Result<SmallVec<A>, D::Error>
    where
        A: Array<Item = (String, String)>,
        D: Deserializer<'de>,
    {
        d.deserialize_any(PairsVisitor(PhantomData))
    }

    struct PairsVisitor<A>(PhantomData<A>);

    impl<'de, A: Array<Item = (String, String)>> Visitor<'de> for PairsVisitor<A> {
        type Value = SmallVec<A>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("a map of string keys to string values") }

        fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<Self::Value, M::Error> {
            let mut out = SmallVec::new();
            while let Some((k, v)) = map.next_entry::<String, String>()? {
                out.push((k, v));
            }
            Ok(out)
        }

        // `labels:` with no value in YAML
        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> { Ok(SmallVec::new()) }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> { Ok(SmallVec::new()) }
    }
}

/// An opaque, versioned object. The dual-write layer forwards it without
/// looking at `spec`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Resource {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Resource {
    pub fn new(name: impl Into<String>, spec: serde_json::Value) -> Self {
        Self { metadata: ObjectMeta { name: name.into(), ..Default::default() }, spec }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str { &self.metadata.name }

    pub fn resource_version(&self) -> Option<&str> { self.metadata.resource_version.as_deref() }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    pub items: Vec<Resource>,
    /// Opaque token for fetching the next page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ResourceList {
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub object: Resource,
    /// True when the update created the object (`force_allow_create`).
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub object: Resource,
    /// False when the backend only scheduled the deletion.
    pub immediate: bool,
}
