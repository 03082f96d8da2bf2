use uuid::Uuid;

/// Namespace for File uuids: deterministic function of (projectId, relative path).
const FILE_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8e, 0x2a, 0x1c, 0x40, 0x9b, 0x31, 0x4b, 0x7a, 0x9b, 0x4e, 0x5f, 0x2d, 0x7a, 0x11, 0x00, 0x01,
]);

/// Namespace for Scope uuids: deterministic function of (file, name, type, signature-hash).
/// Line numbers are deliberately excluded so a re-parse that merely moves a
/// function keeps the same uuid (spec.md §3.1, §9 "UUID stability").
const SCOPE_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8e, 0x2a, 0x1c, 0x40, 0x9b, 0x31, 0x4b, 0x7a, 0x9b, 0x4e, 0x5f, 0x2d, 0x7a, 0x11, 0x00, 0x02,
]);

/// File uuid = f(projectId, relative path). Pure function; stable across runs.
pub fn file_uuid(project_id: &str, relative_path: &str) -> String {
    let key = format!("{project_id}\u{0}{relative_path}");
    Uuid::new_v5(&FILE_NAMESPACE, key.as_bytes()).to_string()
}

/// Scope uuid = f(file, name, type, signature-hash); excludes line numbers.
pub fn scope_uuid(file_uuid: &str, name: &str, scope_type: &str, signature_hash: &str) -> String {
    let key = format!("{file_uuid}\u{0}{name}\u{0}{scope_type}\u{0}{signature_hash}");
    Uuid::new_v5(&SCOPE_NAMESPACE, key.as_bytes()).to_string()
}

/// Entity uuid = "entity:<type>:<normalized-name>" (spec.md §3.1).
pub fn entity_uuid(entity_type: &str, name: &str) -> String {
    let normalized = name.trim().to_lowercase().replace(char::is_whitespace, "_");
    format!("entity:{}:{}", entity_type.to_lowercase(), normalized)
}

/// EmbeddingChunk uuid = "<parentUuid>_chunk_<index>" (spec.md §3.1).
pub fn chunk_uuid(parent_uuid: &str, index: usize) -> String {
    format!("{parent_uuid}_chunk_{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_uuid_is_deterministic() {
        let a = file_uuid("proj1", "src/lib.rs");
        let b = file_uuid("proj1", "src/lib.rs");
        assert_eq!(a, b);
    }

    #[test]
    fn file_uuid_differs_by_path() {
        assert_ne!(file_uuid("proj1", "a.md"), file_uuid("proj1", "b.md"));
    }

    #[test]
    fn scope_uuid_excludes_line_numbers() {
        let f = file_uuid("proj1", "src/lib.rs");
        let a = scope_uuid(&f, "foo", "function", "sig123");
        let b = scope_uuid(&f, "foo", "function", "sig123");
        assert_eq!(a, b, "moving a function must not change its uuid");
    }

    #[test]
    fn scope_uuid_differs_by_signature() {
        let f = file_uuid("proj1", "src/lib.rs");
        let a = scope_uuid(&f, "foo", "function", "sig123");
        let b = scope_uuid(&f, "foo", "function", "sig456");
        assert_ne!(a, b);
    }

    #[test]
    fn entity_uuid_normalizes_name() {
        assert_eq!(entity_uuid("Person", "Ada Lovelace"), "entity:person:ada_lovelace");
    }

    #[test]
    fn chunk_uuid_format() {
        assert_eq!(chunk_uuid("scope:1", 3), "scope:1_chunk_3");
    }
}
