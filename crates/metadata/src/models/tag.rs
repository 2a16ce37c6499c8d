/// A deduplicated label.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Tag {
    pub tag_id: String,
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { tag_id: Self::id_for(&name), name }
    }

    /// Tag ids are derived from the name, so the same name always maps to the
    /// same id regardless of which process created it first.
    #[must_use]
    pub fn id_for(name: &str) -> String {
        let hash = blake3::hash(name.as_bytes()).to_hex();
        format!("tag_{}", &hash[..32])
    }
}
