// An action is permitted in any of the following scenarios:
//
// 1) the permissions for the action contain the group token `group:__world__`
// 2) the caller is the owner: same user id and same consumer key
// 3) a caller is present and the permissions contain `group:__authenticated__`
// 4) the caller's consumer matches the annotation's and the permissions
//    contain `group:__consumer__`
// 5) the caller's consumer matches and the caller id is listed
// 6) the caller's consumer matches and the caller is an admin
//
// Anonymous callers only ever get (1). Caller ids using the group prefix are
// refused outright.
//
// `permissions_filter` expresses the same rules for the `read` action as a
// search filter. The two must stay equivalent.

use log::warn;

use crate::error::StoreError;
use crate::permissions::{
    is_group_id, Action, GROUP_AUTHENTICATED, GROUP_CONSUMER, GROUP_WORLD,
};
use crate::query::Filter;
use crate::types::{Annotation, Caller};

pub fn authorize(
    annotation: &Annotation,
    action: Action,
    caller: Option<&Caller>,
) -> bool {
    let permissions = annotation.permissions();

    // Scenario 1
    if permissions.grants(action, GROUP_WORLD) {
        return true;
    }

    let Some(caller) = caller else {
        return false;
    };

    // Fail fast if this looks dodgy
    if is_group_id(&caller.id) {
        warn!("authz: refused spoofed caller id {:?}", caller.id);
        return false;
    }

    let same_consumer =
        annotation.consumer.as_deref() == Some(caller.consumer_key.as_str());

    // Scenario 2
    if same_consumer && annotation.owner_id() == Some(caller.id.as_str()) {
        return true;
    }

    // Scenario 3
    if permissions.grants(action, GROUP_AUTHENTICATED) {
        return true;
    }

    if !same_consumer {
        return false;
    }

    // Scenarios 4, 5 and 6
    permissions.grants(action, GROUP_CONSUMER)
        || permissions.grants(action, &caller.id)
        || caller.is_admin
}

/// Filter restricting a search to the records `caller` may read.
pub fn permissions_filter(caller: Option<&Caller>) -> Result<Filter, StoreError> {
    // Scenario 1
    let world = Filter::term("permissions.read", GROUP_WORLD);

    let Some(caller) = caller else {
        return Ok(world);
    };

    if is_group_id(&caller.id) {
        warn!(
            "authz: refusing to build a permissions filter for {:?}",
            caller.id
        );
        return Err(StoreError::filter_failed(StoreError::spoofed_identity(
            &caller.id,
        )));
    }

    let consumer = Filter::term("consumer", &caller.consumer_key);
    let mut clauses = vec![
        world,
        // Scenario 2, `user` may be indexed as a string or an object
        Filter::And(vec![
            consumer.clone(),
            Filter::Or(vec![
                Filter::term("user", &caller.id),
                Filter::term("user.id", &caller.id),
            ]),
        ]),
        // Scenario 3
        Filter::term("permissions.read", GROUP_AUTHENTICATED),
        // Scenario 4
        Filter::And(vec![
            consumer.clone(),
            Filter::term("permissions.read", GROUP_CONSUMER),
        ]),
        // Scenario 5
        Filter::And(vec![
            consumer.clone(),
            Filter::term("permissions.read", &caller.id),
        ]),
    ];

    // Scenario 6
    if caller.is_admin {
        clauses.push(consumer);
    }

    Ok(Filter::Or(clauses))
}
