#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("a set needs at least one line (E must be > 0)")]
    ZeroAssociativity,

    #[error("set bits ({set_bits}) + block bits ({block_bits}) must be below 64")]
    AddressBitsOverflow { set_bits: u32, block_bits: u32 },

    #[error("{set_bits} set bits with {lines_per_set} lines per set does not fit in memory")]
    TooLarge { set_bits: u32, lines_per_set: usize },

    #[error("unrecognized replacement policy: {0}")]
    UnknownPolicy(String),
}

#[derive(thiserror::Error, Debug)]
pub enum TraceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed trace record on line {line}: {text:?}")]
    Malformed { line: usize, text: String },
}
