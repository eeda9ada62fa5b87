pub mod tocalls;
