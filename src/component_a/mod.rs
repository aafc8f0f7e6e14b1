// Component A: sensor-to-link data path
// Samples the sensors into the shared snapshot and streams it on a fixed
// period. Timing is measured every cycle; overruns are warned about, not fatal.

pub mod sampler;
pub mod schedule;
pub mod sensor;
pub mod shared_buffer;
pub mod snapshot;
pub mod transmitter;
