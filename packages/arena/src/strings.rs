use cu::pre::*;
use fxhash::FxHashMap;

/// Handle to an interned string
///
/// A StrId packs `(chunk, offset)` into 32 bits and resolves in constant
/// time to the string view and its precomputed FNV-1a hash. The value 0 is
/// reserved as the invalid handle. Handles stay valid for the lifetime of
/// the [`StringTable`] that produced them.
#[rustfmt::skip]
#[derive(Default, DebugCustom, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, From, Into, Display)]
#[display("s{:08x}", self.0)]
#[debug("s{:08x}", self.0)]
pub struct StrId(pub u32);

impl StrId {
    pub const INVALID: Self = Self(0);

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    const fn chunk(self) -> usize {
        (self.0 >> 16) as usize
    }
    const fn offset(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }
}

pub type StrIdMap<T> = FxHashMap<StrId, T>;

const CHUNK_SIZE: usize = 1 << 16;
/// hash (8) + length (4) + NUL terminator (1)
const ENTRY_OVERHEAD: usize = 13;

/// Chunked string interner
///
/// Entries are appended to 64K chunks and never move. Each entry stores the
/// FNV-1a hash and the byte length in front of the NUL-terminated bytes, so
/// both `view` and `hash` are O(1) reads.
pub struct StringTable {
    chunks: Vec<Vec<u8>>,
    dedup: FxHashMap<u64, Vec<StrId>>,
}

impl Default for StringTable {
    fn default() -> Self {
        // one pad byte so that (chunk 0, offset 0) is never a real entry
        Self {
            chunks: vec![{
                let mut c = Vec::with_capacity(CHUNK_SIZE);
                c.push(0);
                c
            }],
            dedup: FxHashMap::default(),
        }
    }
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string. Equal inputs produce bit-identical handles.
    pub fn intern(&mut self, s: &str) -> StrId {
        let hash = fnv1a64(s.as_bytes());
        if let Some(ids) = self.dedup.get(&hash) {
            for id in ids {
                if self.view(*id) == s {
                    return *id;
                }
            }
        }
        let id = self.allocate(s, hash);
        self.dedup.entry(hash).or_default().push(id);
        id
    }

    /// Allocate a fresh entry without registering it for deduplication.
    /// Used for compiler-generated names that must not collide with
    /// source-level names interned later.
    pub fn create_unique(&mut self, s: &str) -> StrId {
        let hash = fnv1a64(s.as_bytes());
        self.allocate(s, hash)
    }

    /// Resolve a handle to its view. O(1).
    pub fn view(&self, id: StrId) -> &str {
        let entry = &self.chunks[id.chunk()][id.offset()..];
        let len = u32::from_le_bytes(entry[8..12].try_into().expect("truncated entry")) as usize;
        std::str::from_utf8(&entry[12..12 + len]).expect("string table entry is not UTF-8")
    }

    /// Precomputed FNV-1a hash of the string. O(1).
    pub fn hash(&self, id: StrId) -> u64 {
        let entry = &self.chunks[id.chunk()][id.offset()..];
        u64::from_le_bytes(entry[..8].try_into().expect("truncated entry"))
    }

    fn allocate(&mut self, s: &str, hash: u64) -> StrId {
        let needed = s.len() + ENTRY_OVERHEAD;
        assert!(
            needed <= CHUNK_SIZE,
            "string too long to intern: {} bytes",
            s.len()
        );
        let mut chunk_idx = self.chunks.len() - 1;
        if self.chunks[chunk_idx].len() + needed > CHUNK_SIZE {
            self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
            chunk_idx += 1;
        }
        let chunk = &mut self.chunks[chunk_idx];
        let offset = chunk.len();
        chunk.extend_from_slice(&hash.to_le_bytes());
        chunk.extend_from_slice(&(s.len() as u32).to_le_bytes());
        chunk.extend_from_slice(s.as_bytes());
        chunk.push(0);
        StrId(((chunk_idx as u32) << 16) | offset as u32)
    }
}

/// FNV-1a, the same function the table stores alongside each entry
pub const fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x100000001b3);
        i += 1;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_idempotent() {
        let mut t = StringTable::new();
        let a = t.intern("vector");
        let b = t.intern("vector");
        assert_eq!(a, b);
        assert_eq!(t.view(a), "vector");
    }

    #[test]
    fn test_intern_roundtrip() {
        let mut t = StringTable::new();
        for s in ["", "x", "operator<<", "std", "の"] {
            let id = t.intern(s);
            assert_eq!(t.view(id), s);
            assert_eq!(t.hash(id), fnv1a64(s.as_bytes()));
        }
    }

    #[test]
    fn test_invalid_handle_reserved() {
        let mut t = StringTable::new();
        let id = t.intern("first");
        assert!(id.is_valid());
        assert_ne!(id, StrId::INVALID);
    }

    #[test]
    fn test_create_unique_never_collides() {
        let mut t = StringTable::new();
        let a = t.intern("__anon_type_0");
        let b = t.create_unique("__anon_type_0");
        let c = t.create_unique("__anon_type_0");
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(t.view(b), t.view(c));
        // interning still resolves to the original
        assert_eq!(t.intern("__anon_type_0"), a);
    }

    #[test]
    fn test_chunk_spill() {
        let mut t = StringTable::new();
        let mut ids = Vec::new();
        for i in 0..4000 {
            let s = format!("identifier_with_some_length_{i}");
            ids.push((t.intern(&s), s));
        }
        for (id, s) in ids {
            assert_eq!(t.view(id), s);
        }
    }
}
