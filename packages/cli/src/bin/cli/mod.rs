pub mod challenges;
pub mod instances;
