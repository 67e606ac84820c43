pub mod agent;
pub mod run;
pub mod sandbox;
pub mod serve;
