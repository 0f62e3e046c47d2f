use crate::catalog::SpaceCatalog;
use crate::error::HubError;
use crate::secrets::CredentialStore;

/// Robot authentication: the space must exist and be enabled, the robot id
/// must be on the space's allow-list, and the presented secret must match
/// the stored credential. Every failing step collapses to the same generic
/// `AuthFailed` so a caller cannot probe which check rejected it. Both
/// checks are evaluated unconditionally for the same reason.
pub fn authenticate(
    catalog: &SpaceCatalog,
    credentials: &CredentialStore,
    space_id: &str,
    robot_id: &str,
    secret: &str,
) -> Result<(), HubError> {
    let space_ok = catalog
        .get(space_id)
        .map(|space| space.enabled && space.robot_ids.iter().any(|id| id == robot_id))
        .unwrap_or(false);
    let secret_ok = credentials.validate(robot_id, secret);

    if space_ok && secret_ok {
        Ok(())
    } else {
        Err(HubError::AuthFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SpaceDef;

    fn fixtures() -> (SpaceCatalog, CredentialStore) {
        let catalog = SpaceCatalog::from_defs(vec![
            SpaceDef {
                id: "lobby".into(),
                display_name: "Lobby".into(),
                description: String::new(),
                image_url: None,
                capacity: 2,
                enabled: true,
                robot_ids: vec!["r1".into()],
            },
            SpaceDef {
                id: "workshop".into(),
                display_name: "Workshop".into(),
                description: String::new(),
                image_url: None,
                capacity: 2,
                enabled: false,
                robot_ids: vec!["r1".into()],
            },
        ])
        .unwrap();
        let store = CredentialStore::from_pairs([("r1", "s3cret"), ("r2", "other")]);
        (catalog, store)
    }

    #[test]
    fn valid_credentials_pass() {
        let (catalog, store) = fixtures();
        assert!(authenticate(&catalog, &store, "lobby", "r1", "s3cret").is_ok());
    }

    #[test]
    fn every_failure_is_generic() {
        let (catalog, store) = fixtures();
        // Unknown space, disabled space, robot not allow-listed, bad secret:
        // all indistinguishable from the outside.
        for (space, robot, secret) in [
            ("cellar", "r1", "s3cret"),
            ("workshop", "r1", "s3cret"),
            ("lobby", "r2", "other"),
            ("lobby", "r1", "wrong"),
        ] {
            assert_eq!(
                authenticate(&catalog, &store, space, robot, secret),
                Err(HubError::AuthFailed)
            );
        }
    }
}
