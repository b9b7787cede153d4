pub mod game;
pub mod result;
