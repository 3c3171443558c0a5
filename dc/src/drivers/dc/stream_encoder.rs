//! Stream encoders and audio endpoints

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineId {
    DigA,
    DigB,
    DigC,
    DigD,
    DigE,
    DigF,
    /// Encoder for a virtual/wireless link, no physical DIG behind it
    Virtual,
}

impl EngineId {
    const DIGS: [EngineId; 6] = [
        EngineId::DigA,
        EngineId::DigB,
        EngineId::DigC,
        EngineId::DigD,
        EngineId::DigE,
        EngineId::DigF,
    ];

    /// Physical engines present in firmware `mask` (bit 0 = DIGA).
    pub fn from_mask(mask: u8) -> impl Iterator<Item = EngineId> {
        Self::DIGS
            .into_iter()
            .enumerate()
            .filter(move |(i, _)| mask & (1 << i) != 0)
            .map(|(_, id)| id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEncoder {
    pub id: EngineId,
}

impl StreamEncoder {
    pub fn new(id: EngineId) -> Self {
        Self { id }
    }

    pub fn is_virtual(&self) -> bool {
        self.id == EngineId::Virtual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Audio {
    pub inst: usize,
}
