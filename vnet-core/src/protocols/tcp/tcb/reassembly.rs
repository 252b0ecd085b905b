/// The receive window. Out of order data waits here at its offset from
/// RCV.NXT until the gap before it fills.
///
/// `pending` is a side array parallel to the buffer: a nonzero entry marks
/// the start of a stored segment and holds its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembly {
    buffer: Vec<u8>,
    pending: Vec<u16>,
    /// The buffer index of RCV.NXT
    head: usize,
}

impl Reassembly {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            pending: vec![0; capacity],
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Stores data that starts `offset` bytes past RCV.NXT. The caller
    /// keeps `offset + data.len()` within the capacity.
    pub fn insert(&mut self, offset: usize, data: &[u8]) {
        if data.is_empty() || offset + data.len() > self.capacity() {
            return;
        }
        self.write(offset, data);
        let slot = self.index(offset);
        self.pending[slot] = self.pending[slot].max(data.len() as u16);
    }

    /// Takes in-order data starting at RCV.NXT and returns it joined with
    /// every stored segment it now reaches. RCV.NXT advances by the length
    /// of what is returned.
    pub fn deliver(&mut self, data: &[u8]) -> Vec<u8> {
        let data = &data[..data.len().min(self.capacity())];
        self.write(0, data);

        let mut end = data.len();
        let mut offset = 0;
        // A segment starting right at `end` abuts and joins too
        while offset <= end && offset < self.capacity() {
            let slot = self.index(offset);
            let length = self.pending[slot] as usize;
            if length > 0 {
                end = end.max(offset + length);
                self.pending[slot] = 0;
            }
            offset += 1;
        }

        let out = (0..end).map(|i| self.buffer[self.index(i)]).collect();
        self.head = self.index(end);
        out
    }

    /// Bytes past RCV.NXT covered by stored segments.
    #[cfg(test)]
    pub fn extent(&self) -> usize {
        (0..self.capacity())
            .filter_map(|offset| match self.pending[self.index(offset)] {
                0 => None,
                length => Some(offset + length as usize),
            })
            .max()
            .unwrap_or(0)
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let slot = self.index(offset + i);
            self.buffer[slot] = *byte;
        }
    }

    fn index(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }
}
