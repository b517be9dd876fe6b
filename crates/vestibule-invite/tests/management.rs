//! Invitation management: create, list, delete, permissions, events.

use std::sync::Arc;

use vestibule_core::{InvitationEmailSentStatus, InvitationStatus, InviteListItem};
use vestibule_invite::{
    DeleteInvitationError, InviteEvent, InviteService, ListInvitationsError,
    NewDeviceInvitationError, NewUserInvitationError,
};
use vestibule_testkit::{TestOrganization, CLAIMER_EMAIL};

fn admin_service(org: &TestOrganization) -> Arc<InviteService> {
    Arc::new(InviteService::new().with_authenticated_transport(
        org.admin.clone(),
        org.server.authenticated(&org.admin),
    ))
}

#[tokio::test]
async fn create_list_delete_lifecycle() {
    let org = TestOrganization::new();
    let service = admin_service(&org);

    let (user_token, email_status) = service
        .new_user_invitation(CLAIMER_EMAIL.into(), true)
        .await
        .expect("user invitation created");
    assert_eq!(email_status, InvitationEmailSentStatus::Success);
    let (device_token, _) = service
        .new_device_invitation(false)
        .await
        .expect("device invitation created");

    let items = service.list_invitations().await.expect("listed");
    assert_eq!(items.len(), 2);
    let user_item = items
        .iter()
        .find(|i| i.token() == user_token)
        .expect("user invitation listed");
    match user_item {
        InviteListItem::User {
            claimer_email,
            status,
            ..
        } => {
            assert_eq!(claimer_email, CLAIMER_EMAIL);
            assert_eq!(*status, InvitationStatus::Idle);
        }
        InviteListItem::Device { .. } => panic!("expected a user invitation"),
    }
    assert!(items.iter().any(|i| i.token() == device_token));

    service
        .delete_invitation(user_token)
        .await
        .expect("deleted");
    let items = service.list_invitations().await.expect("listed");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].token(), device_token);
}

#[tokio::test]
async fn deleting_twice_reports_already_deleted() {
    let org = TestOrganization::new();
    let service = admin_service(&org);

    let (token, _) = service
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    service.delete_invitation(token).await.expect("deleted");
    let err = service
        .delete_invitation(token)
        .await
        .expect_err("second delete must fail");
    assert_eq!(err, DeleteInvitationError::AlreadyDeleted);

    // An unknown token is a different story
    let err = service
        .delete_invitation(vestibule_core::InvitationToken::new())
        .await
        .expect_err("unknown token");
    assert_eq!(err, DeleteInvitationError::NotFound);
}

#[tokio::test]
async fn creating_twice_for_the_same_email_returns_the_same_token() {
    let org = TestOrganization::new();
    let service = admin_service(&org);

    let (first, _) = service
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("created");
    let (second, _) = service
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("created again");
    assert_eq!(first, second);
    assert_eq!(service.list_invitations().await.expect("listed").len(), 1);
}

#[tokio::test]
async fn inviting_an_existing_member_is_rejected() {
    let org = TestOrganization::new();
    let service = admin_service(&org);

    let err = service
        .new_user_invitation("eli.vance@blackmesa.nm".into(), false)
        .await
        .expect_err("the admin is already a member");
    assert_eq!(err, NewUserInvitationError::AlreadyMember);
}

#[tokio::test]
async fn non_admins_cannot_invite_users() {
    let org = TestOrganization::new();
    let member = org.add_standard_member("barney.calhoun@blackmesa.nm", "Barney Calhoun");
    let service = Arc::new(InviteService::new().with_authenticated_transport(
        member.clone(),
        org.server.authenticated(&member),
    ));

    let err = service
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect_err("standard members cannot invite users");
    assert_eq!(err, NewUserInvitationError::NotAllowed);

    // But they can enroll devices on their own account
    service
        .new_device_invitation(false)
        .await
        .expect("device invitation allowed");
}

#[tokio::test]
async fn emailing_a_member_without_address_fails() {
    let org = TestOrganization::new();
    let member = org.add_member_without_email();
    let service = Arc::new(InviteService::new().with_authenticated_transport(
        member.clone(),
        org.server.authenticated(&member),
    ));

    let err = service
        .new_device_invitation(true)
        .await
        .expect_err("no address to send to");
    assert_eq!(err, NewDeviceInvitationError::SendEmailToUserWithoutEmail);

    // Without the email there is nothing to object to
    service
        .new_device_invitation(false)
        .await
        .expect("invitation without email");
}

#[tokio::test]
async fn offline_management_reports_offline() {
    let org = TestOrganization::new();
    let service = admin_service(&org);

    org.server.set_offline(true);
    let err = service
        .list_invitations()
        .await
        .expect_err("server is offline");
    assert_eq!(err, ListInvitationsError::Offline);
    let err = service
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect_err("server is offline");
    assert_eq!(err, NewUserInvitationError::Offline);

    org.server.set_offline(false);
    service.list_invitations().await.expect("back online");
}

#[tokio::test]
async fn lifecycle_changes_are_published_as_events() {
    let org = TestOrganization::new();
    let service = admin_service(&org);
    let mut events = service.subscribe_events();

    let (token, _) = service
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("created");
    service.delete_invitation(token).await.expect("deleted");

    assert_eq!(
        events.recv().await,
        Some(InviteEvent::InvitationChanged {
            token,
            status: InvitationStatus::Idle,
        })
    );
    assert_eq!(
        events.recv().await,
        Some(InviteEvent::InvitationChanged {
            token,
            status: InvitationStatus::Deleted,
        })
    );
}

#[tokio::test]
async fn management_without_transport_is_an_internal_error() {
    let service = InviteService::new();
    let err = service
        .list_invitations()
        .await
        .expect_err("no transport configured");
    assert!(matches!(err, ListInvitationsError::Internal { .. }));
}
