pub mod alphabet;
pub mod corpus;
pub mod crf;
pub mod phoneme;
pub mod report;
pub mod settings;
pub mod tuning;
