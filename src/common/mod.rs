mod temp;

pub use temp::{Context, Label, Temp};
