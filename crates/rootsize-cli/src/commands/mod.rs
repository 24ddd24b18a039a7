pub mod decide;
pub mod rules;
pub mod run;
