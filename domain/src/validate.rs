//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use crate::CoreError;
use crate::TaskRequest;

/// Upper bound on task names, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// Validate a create/update request.
///
/// `name` is required. `done` may be omitted but, when present, must be
/// `false`: tasks are always created open.
pub fn validate_task_request(req: &TaskRequest) -> Result<(), CoreError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(CoreError::InvalidInput("name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::InvalidInput(format!(
            "name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    if req.done == Some(true) {
        return Err(CoreError::InvalidInput("done must be false".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_name_without_done() {
        assert!(validate_task_request(&TaskRequest::new("write docs")).is_ok());
    }

    #[test]
    fn accepts_explicit_false() {
        let req = TaskRequest {
            name: "x".into(),
            done: Some(false),
        };
        assert!(validate_task_request(&req).is_ok());
    }

    #[test]
    fn rejects_done_true() {
        let req = TaskRequest {
            name: "x".into(),
            done: Some(true),
        };
        assert!(matches!(
            validate_task_request(&req),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_blank_and_oversized_names() {
        assert!(validate_task_request(&TaskRequest::new("   ")).is_err());
        assert!(validate_task_request(&TaskRequest::new("a".repeat(MAX_NAME_LEN + 1))).is_err());
    }
}
