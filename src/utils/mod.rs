pub mod clock;
pub mod hash;
pub mod io;
