use serde::Serialize;

use crate::errors::HubError;

/// Collects the positional arguments of an invocation.
///
/// ```ignore
/// client.invoke_with_args::<bool, _>("PushEntity".to_string(), |c| {
///     c.argument(entity);
/// }).await?;
/// ```
pub struct ArgumentConfiguration {
    arguments: Vec<serde_json::Value>,
    error: Option<HubError>,
}

impl ArgumentConfiguration {
    pub(crate) fn new() -> Self {
        ArgumentConfiguration { arguments: Vec::new(), error: None }
    }

    /// Appends one positional argument. A value that fails to serialize poisons
    /// the whole configuration and fails the invocation before anything is
    /// sent.
    pub fn argument<T: Serialize>(&mut self, value: T) -> &mut Self {
        match serde_json::to_value(value) {
            Ok(value) => self.arguments.push(value),
            Err(error) => {
                if self.error.is_none() {
                    self.error = Some(HubError::serialization(error));
                }
            }
        }

        self
    }

    pub(crate) fn into_arguments(self) -> Result<Vec<serde_json::Value>, HubError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.arguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn collects_arguments_in_order() {
        let mut configuration = ArgumentConfiguration::new();
        configuration.argument("first").argument(2).argument(true);

        let arguments = configuration.into_arguments().unwrap();
        assert_eq!(arguments, vec![json!("first"), json!(2), json!(true)]);
    }

    #[test]
    fn empty_configuration_yields_no_arguments() {
        let arguments = ArgumentConfiguration::new().into_arguments().unwrap();
        assert!(arguments.is_empty());
    }
}
