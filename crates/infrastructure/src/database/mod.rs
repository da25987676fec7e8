pub mod postgres;

pub use postgres::PostgresJobStore;
