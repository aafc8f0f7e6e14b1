//component B: link side
//Link callbacks and state, delivery health, escalating recovery and the
//hardware watchdog the transmitter feeds.
pub mod health;
pub mod hw_watchdog;
pub mod link;
pub mod recovery;
pub mod supervisor;
