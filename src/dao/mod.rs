pub mod games;
pub mod maps;
pub mod models;
pub mod mods;
pub mod registry;
pub mod storage;
