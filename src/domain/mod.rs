pub mod answer;
pub mod models;
pub mod survey;
pub mod wizard;
