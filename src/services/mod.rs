pub mod broadcast_service;
pub mod client_service;
pub mod game_service;
pub mod option_service;
pub mod rating_service;
pub mod result_service;
pub mod stats_service;
pub mod validity_service;
