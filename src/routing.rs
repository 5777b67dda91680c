use crate::error::ProxyError;
use crate::registry::Model;
use std::collections::HashMap;
use tracing::debug;

/// Select the model with the fewest in-flight requests.
///
/// Models are scanned in registry order and a later model only wins with a
/// strictly smaller count, so ties always go to the earliest-listed model.
/// Models absent from `counts` have zero requests in flight.
pub fn select_least_loaded<'a>(
    models: &'a [Model],
    counts: &HashMap<String, usize>,
) -> Result<&'a Model, ProxyError> {
    let mut selected: Option<(&Model, usize)> = None;

    for model in models {
        let in_flight = counts.get(&model.id).copied().unwrap_or(0);
        match selected {
            Some((_, min)) if in_flight >= min => {}
            _ => selected = Some((model, in_flight)),
        }
    }

    let (model, in_flight) = selected.ok_or(ProxyError::NoModelsAvailable)?;
    debug!("Selected model {} with {} in-progress requests", model.id, in_flight);
    Ok(model)
}

/// Loaded models that currently have no requests in flight, in registry order.
pub fn free_models(models: &[Model], counts: &HashMap<String, usize>) -> Vec<String> {
    models
        .iter()
        .filter(|m| counts.get(&m.id).copied().unwrap_or(0) == 0)
        .map(|m| m.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ids: &[&str]) -> Vec<Model> {
        ids.iter().map(|id| Model::loaded(id)).collect()
    }

    fn counts(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
        pairs.iter().map(|(id, n)| (id.to_string(), *n)).collect()
    }

    #[test]
    fn test_selects_lowest_count() {
        let models = registry(&["A", "B", "C"]);
        let selected = select_least_loaded(&models, &counts(&[("A", 2), ("B", 0), ("C", 1)])).unwrap();
        assert_eq!(selected.id, "B");
    }

    #[test]
    fn test_tie_goes_to_first_listed() {
        let models = registry(&["A", "B", "C"]);
        let selected = select_least_loaded(&models, &counts(&[("A", 1), ("B", 1), ("C", 1)])).unwrap();
        assert_eq!(selected.id, "A");
    }

    #[test]
    fn test_missing_counts_are_zero() {
        let models = registry(&["A", "B"]);
        let selected = select_least_loaded(&models, &counts(&[("A", 3)])).unwrap();
        assert_eq!(selected.id, "B");
    }

    #[test]
    fn test_counts_for_unlisted_models_are_ignored() {
        let models = registry(&["A", "B"]);
        let selected = select_least_loaded(&models, &counts(&[("Z", 0), ("A", 1), ("B", 2)])).unwrap();
        assert_eq!(selected.id, "A");
    }

    #[test]
    fn test_empty_registry_fails() {
        let result = select_least_loaded(&[], &counts(&[("A", 0)]));
        assert!(matches!(result, Err(ProxyError::NoModelsAvailable)));
    }

    #[test]
    fn test_free_models() {
        let models = registry(&["A", "B", "C"]);
        assert_eq!(free_models(&models, &counts(&[("B", 2)])), vec!["A", "C"]);
    }
}
