#[cfg(test)]
pub mod config_tests;

#[cfg(test)]
pub mod controller_tests;

#[cfg(test)]
pub mod policy_tests;
