// Repositories module - data access layer

pub mod car_repository;
pub mod dynamodb;
pub mod id_sequence;
pub mod table_manager;
pub mod user_repository;


pub use car_repository::{CarRepository, DynamoDbCarRepository};
pub use dynamodb::DynamoDbStore;
pub use id_sequence::DynamoDbIdSequence;
pub use table_manager::TableManager;
pub use user_repository::{DynamoDbUserRepository, UserRepository};
