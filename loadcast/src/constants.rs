pub const DEFAULT_PORT: u16 = 6787;
pub const LISTEN_BACKLOG: u32 = 5;
pub const RECV_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(5000); // client side only

pub const HEADER_SIZE: usize = 4 + 4; // ROWS(4) + COLS(4)
pub const CELL_SIZE: usize = 4;
pub const PREDICTION_SIZE: usize = 8;

// upper bound for memory reserved up front, the rest grows while cells arrive
pub const PREALLOC_CELLS: usize = 1 << 16;

// one forecast per row is held in memory and written back, a header may not ask for more
pub const MAX_ROWS: u32 = 1 << 20;
