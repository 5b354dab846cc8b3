//! Single capability check for every engine operation.
//!
//! Callers describe who is acting, what they want to do, and which resource the action touches;
//! [`authorize`] answers allow or deny. Ownership and assignment relations are part of the
//! resource description so the rules stay in one table.

use serde::{Deserialize, Serialize};

use super::domain::{TargetRecord, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Instructor,
    Learner,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Role::Admin),
            "INSTRUCTOR" => Some(Role::Instructor),
            "LEARNER" => Some(Role::Learner),
            _ => None,
        }
    }
}

/// Authenticated identity supplied with each request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(id: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            id: UserId::new(id),
            roles,
        }
    }

    pub fn learner(id: impl Into<String>) -> Self {
        Self::new(id, vec![Role::Learner])
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, vec![Role::Admin])
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    EnrollOnBehalf,
    ApproveEnrollment,
    RemoveEnrollment,
    DropEnrollment,
    PurgeEnrollments,
    IssueCredential,
    ViewAnalytics,
    ManageSettings,
}

/// Relations of the resource an action touches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resource<'a> {
    pub owner: Option<&'a UserId>,
    pub creator: Option<&'a UserId>,
    pub instructors: &'a [UserId],
}

impl<'a> Resource<'a> {
    pub fn target(entity: &'a TargetRecord) -> Self {
        Self {
            owner: None,
            creator: Some(entity.created_by()),
            instructors: entity.instructors(),
        }
    }

    pub fn owned_by(mut self, owner: &'a UserId) -> Self {
        self.owner = Some(owner);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(&'static str),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub fn authorize(principal: &Principal, action: Action, resource: &Resource<'_>) -> Decision {
    if principal.is_admin() {
        return Decision::Allow;
    }

    let is_owner = resource.owner == Some(&principal.id);
    let is_creator = resource.creator == Some(&principal.id);
    let is_assigned_instructor =
        principal.has_role(Role::Instructor) && resource.instructors.contains(&principal.id);
    let is_staff = is_creator || is_assigned_instructor;

    let allowed = match action {
        Action::EnrollOnBehalf | Action::ApproveEnrollment | Action::ViewAnalytics => is_staff,
        Action::RemoveEnrollment | Action::DropEnrollment => is_owner || is_staff,
        Action::PurgeEnrollments => is_creator,
        Action::IssueCredential => is_owner,
        Action::ManageSettings => false,
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny(denial_reason(action))
    }
}

fn denial_reason(action: Action) -> &'static str {
    match action {
        Action::EnrollOnBehalf => "only admins, creators, or assigned instructors may enroll other users",
        Action::ApproveEnrollment => "only admins, creators, or assigned instructors may approve enrollments",
        Action::RemoveEnrollment => "not allowed to remove this enrollment",
        Action::DropEnrollment => "not allowed to drop this enrollment",
        Action::PurgeEnrollments => "only admins or the creator may remove all enrollments",
        Action::IssueCredential => "credentials may only be issued to their owner or by an admin",
        Action::ViewAnalytics => "analytics are restricted to admins, creators, and assigned instructors",
        Action::ManageSettings => "engine settings are restricted to admins",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource<'a>(creator: &'a UserId, instructors: &'a [UserId]) -> Resource<'a> {
        Resource {
            owner: None,
            creator: Some(creator),
            instructors,
        }
    }

    #[test]
    fn admins_are_always_allowed() {
        let creator = UserId::new("creator");
        let admin = Principal::admin("root");
        for action in [
            Action::EnrollOnBehalf,
            Action::ApproveEnrollment,
            Action::PurgeEnrollments,
            Action::IssueCredential,
            Action::ManageSettings,
        ] {
            assert!(authorize(&admin, action, &resource(&creator, &[])).is_allowed());
        }
    }

    #[test]
    fn instructors_need_an_assignment() {
        let creator = UserId::new("creator");
        let assigned = [UserId::new("teach-1")];
        let assigned_instructor = Principal::new("teach-1", vec![Role::Instructor]);
        let other_instructor = Principal::new("teach-2", vec![Role::Instructor]);

        let res = resource(&creator, &assigned);
        assert!(authorize(&assigned_instructor, Action::ApproveEnrollment, &res).is_allowed());
        assert!(!authorize(&other_instructor, Action::ApproveEnrollment, &res).is_allowed());
    }

    #[test]
    fn assignment_without_instructor_role_is_not_enough() {
        let creator = UserId::new("creator");
        let assigned = [UserId::new("ta")];
        let learner = Principal::learner("ta");
        assert_eq!(
            authorize(&learner, Action::EnrollOnBehalf, &resource(&creator, &assigned)),
            Decision::Deny(denial_reason(Action::EnrollOnBehalf))
        );
    }

    #[test]
    fn owners_may_remove_but_not_approve() {
        let creator = UserId::new("creator");
        let owner = UserId::new("learner-1");
        let principal = Principal::learner("learner-1");
        let res = resource(&creator, &[]).owned_by(&owner);

        assert!(authorize(&principal, Action::RemoveEnrollment, &res).is_allowed());
        assert!(authorize(&principal, Action::IssueCredential, &res).is_allowed());
        assert!(!authorize(&principal, Action::ApproveEnrollment, &res).is_allowed());
    }

    #[test]
    fn creators_cannot_issue_credentials_for_learners() {
        let creator = UserId::new("creator");
        let owner = UserId::new("learner-1");
        let principal = Principal::new("creator", vec![Role::Instructor]);
        let res = resource(&creator, &[]).owned_by(&owner);
        assert!(!authorize(&principal, Action::IssueCredential, &res).is_allowed());
        assert!(authorize(&principal, Action::PurgeEnrollments, &res).is_allowed());
    }

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!(Role::parse(" admin "), Some(Role::Admin));
        assert_eq!(Role::parse("Instructor"), Some(Role::Instructor));
        assert_eq!(Role::parse("guest"), None);
    }
}
