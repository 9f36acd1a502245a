pub mod cache;
pub mod haglund;
pub mod jikan;
pub mod kitsu;
pub mod mapping;
pub mod mediaflow;
pub mod resolver;
pub mod scraper;
pub mod tmdb;
