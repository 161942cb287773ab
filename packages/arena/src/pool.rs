use cu::pre::*;

/// Chunked append-only store with dense `u32` handles
///
/// Items are pushed sequentially and never move. `truncate` exists only for
/// rolling back speculative work (SFINAE trials) before any handle from the
/// rolled-back range has escaped.
pub struct Pool<T> {
    chunks: Vec<Vec<T>>,
    chunk_cap: usize,
    len: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::with_chunk_capacity(1024)
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_capacity(chunk_cap: usize) -> Self {
        Self {
            chunks: vec![],
            chunk_cap,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Push a value; the returned handle is stable for the pool's lifetime
    pub fn push(&mut self, value: T) -> u32 {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() < self.chunk_cap => chunk.push(value),
            _ => {
                let mut chunk = Vec::with_capacity(self.chunk_cap);
                chunk.push(value);
                self.chunks.push(chunk);
            }
        }
        let id = self.len as u32;
        self.len += 1;
        id
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        let id = id as usize;
        if id >= self.len {
            return None;
        }
        self.chunks[id / self.chunk_cap].get(id % self.chunk_cap)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        let id = id as usize;
        if id >= self.len {
            return None;
        }
        self.chunks[id / self.chunk_cap].get_mut(id % self.chunk_cap)
    }

    /// Remove every item with handle >= new_len. Only valid while no handle
    /// in the removed range is referenced anywhere.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len >= self.len {
            return;
        }
        let keep_chunks = new_len.div_ceil(self.chunk_cap);
        self.chunks.truncate(keep_chunks.max(1));
        let num_chunks = self.chunks.len();
        if let Some(last) = self.chunks.last_mut() {
            let keep = new_len - (num_chunks - 1) * self.chunk_cap;
            last.truncate(keep);
        }
        self.len = new_len;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.chunks.iter().flatten()
    }

    pub fn iter_from(&self, start: u32) -> impl Iterator<Item = (u32, &T)> {
        self.chunks
            .iter()
            .flatten()
            .enumerate()
            .skip(start as usize)
            .map(|(i, t)| (i as u32, t))
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Saved token-stream position handle, issued by the stream adapter
#[rustfmt::skip]
#[derive(Default, DebugCustom, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, From, Into, Display)]
#[display("@{}", self.0)]
#[debug("@{}", self.0)]
pub struct Cursor(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_get() {
        let mut p = Pool::with_chunk_capacity(4);
        for i in 0..10u32 {
            assert_eq!(p.push(i * 10), i);
        }
        assert_eq!(p.len(), 10);
        assert_eq!(p.get(0), Some(&0));
        assert_eq!(p.get(7), Some(&70));
        assert_eq!(p.get(10), None);
    }

    #[test]
    fn test_truncate_rollback() {
        let mut p = Pool::with_chunk_capacity(4);
        for i in 0..10u32 {
            p.push(i);
        }
        p.truncate(5);
        assert_eq!(p.len(), 5);
        assert_eq!(p.get(4), Some(&4));
        assert_eq!(p.get(5), None);
        assert_eq!(p.push(99), 5);
        assert_eq!(p.get(5), Some(&99));
    }

    #[test]
    fn test_iter_order() {
        let mut p = Pool::with_chunk_capacity(3);
        for i in 0..7u32 {
            p.push(i);
        }
        let v: Vec<u32> = p.iter().copied().collect();
        assert_eq!(v, vec![0, 1, 2, 3, 4, 5, 6]);
    }
}
