pub mod completion;
pub mod definition;
pub mod formatting;
pub mod hover;

#[cfg(test)]
pub(crate) mod test_support;
