//! Gantry alignment bench: frame acquisition, the alignment step and the
//! session supervisor, plus a thin HTTP front end.

pub mod alignment;
pub mod frame_acquisition;
pub mod gantry_server;
pub mod supervisor;
