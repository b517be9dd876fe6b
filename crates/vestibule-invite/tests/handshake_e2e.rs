//! End-to-end handshake runs: both state machines driven concurrently
//! against the in-memory server.

use std::sync::Arc;

use vestibule_core::{
    DeviceSaveStrategy, InvitationAddr, InvitationInfo, InvitationToken, InvitationType,
    SasCode, UserProfile,
};
use vestibule_invite::{
    ClaimInProgressError, GreetInProgressError, InviteService,
};
use vestibule_testkit::{
    claimer_handle, device_label, MemoryDeviceVault, TestOrganization, CLAIMER_EMAIL,
};

/// Opt-in tracing for debugging a failing run: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn claimer_service(
    org: &TestOrganization,
    token: InvitationToken,
    invitation_type: InvitationType,
    vault: &Arc<MemoryDeviceVault>,
) -> Arc<InviteService> {
    let addr = InvitationAddr::new(
        org.server.organization_id().clone(),
        token,
        invitation_type,
    );
    Arc::new(
        InviteService::new()
            .with_invited_transport(addr, org.server.invited(token))
            .with_device_storage(vault.clone()),
    )
}

fn greeter_service(org: &TestOrganization) -> Arc<InviteService> {
    Arc::new(InviteService::new().with_authenticated_transport(
        org.admin.clone(),
        org.server.authenticated(&org.admin),
    ))
}

/// Drives the whole greeter side of a user invitation, granting the
/// claimer's requested attributes with the given profile.
async fn drive_user_greeter(
    service: &InviteService,
    token: InvitationToken,
    profile: UserProfile,
) -> Result<(SasCode, SasCode, Vec<SasCode>), GreetInProgressError> {
    let handle = service
        .start_user_invitation_greet(token)
        .map_err(|e| GreetInProgressError::Internal {
            message: e.to_string(),
        })?;
    let canceller = service.new_canceller();
    let s1 = service
        .greeter_initial_do_wait_peer(canceller, handle)
        .await?;
    let s2 = service
        .greeter_in_progress_1_do_wait_peer_trust(canceller, handle)
        .await?;
    service
        .greeter_in_progress_2_do_signify_trust(canceller, handle)
        .await?;
    let s4 = service
        .greeter_in_progress_3_do_get_claim_requests(canceller, handle)
        .await?;
    service
        .greeter_in_progress_4_do_create_new_user(
            canceller,
            handle,
            s4.requested_human_handle.clone(),
            s4.requested_device_label.clone(),
            profile,
        )
        .await?;
    Ok((s1.greeter_sas, s2.claimer_sas, s2.claimer_sas_choices))
}

/// Drives the whole claimer side of a user invitation through the save.
async fn drive_user_claimer(
    service: &InviteService,
) -> Result<(SasCode, Vec<SasCode>, SasCode, vestibule_core::AvailableDevice), ClaimInProgressError>
{
    let (handle, _info) = service
        .claimer_retrieve_info()
        .await
        .map_err(|e| ClaimInProgressError::Internal {
            message: e.to_string(),
        })?;
    let canceller = service.new_canceller();
    let s1 = service
        .claimer_initial_do_wait_peer(canceller, handle)
        .await?;
    let s2 = service
        .claimer_in_progress_1_do_signify_trust(canceller, handle)
        .await?;
    service
        .claimer_in_progress_2_do_wait_peer_trust(canceller, handle)
        .await?;
    service
        .claimer_in_progress_3_do_claim(
            canceller,
            handle,
            Some(device_label("hev-suit")),
            Some(claimer_handle()),
        )
        .await?;
    let available = service
        .claimer_finalize_save_local_device(handle, DeviceSaveStrategy::Password {
            password: "crowbar".into(),
        })
        .await?;
    Ok((s1.greeter_sas, s1.greeter_sas_choices, s2.claimer_sas, available))
}

#[tokio::test]
async fn user_invitation_full_round_trip() {
    init_tracing();
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let (greet_result, claim_result) = tokio::join!(
        drive_user_greeter(&greeter, token, UserProfile::Standard),
        drive_user_claimer(&claimer),
    );
    let (greeter_side_greeter_sas, greeter_side_claimer_sas, claimer_choices) =
        greet_result.expect("greeter side completed");
    let (claimer_side_greeter_sas, greeter_choices, claimer_side_claimer_sas, available) =
        claim_result.expect("claimer side completed");

    // Both sides derived the same codes from the shared secret
    assert_eq!(claimer_side_greeter_sas, greeter_side_greeter_sas);
    assert_eq!(claimer_side_claimer_sas, greeter_side_claimer_sas);

    // Choice sets contain the true code exactly once among four candidates
    for (choices, correct) in [
        (&greeter_choices, &claimer_side_greeter_sas),
        (&claimer_choices, &greeter_side_claimer_sas),
    ] {
        assert_eq!(choices.len(), 4);
        assert_eq!(choices.iter().filter(|c| *c == correct).count(), 1);
    }

    // The claimer got what it asked for, except the profile which is the
    // greeter's call
    assert_eq!(available.human_handle, Some(claimer_handle()));
    assert_eq!(available.device_label, Some(device_label("hev-suit")));
    assert_eq!(available.organization_id, *org.server.organization_id());

    let (user_id, profile) = org
        .server
        .find_user_by_email(CLAIMER_EMAIL)
        .expect("user enrolled server-side");
    assert_eq!(user_id, available.user_id);
    assert_eq!(profile, UserProfile::Standard);
    assert_eq!(vault.saved_devices().len(), 1);
}

#[tokio::test]
async fn concurrent_exchanges_on_distinct_handles_do_not_contend() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token_a, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("first invitation created");
    let (token_b, _) = greeter
        .new_user_invitation("alyx.vance@blackmesa.nm".into(), false)
        .await
        .expect("second invitation created");
    assert_ne!(token_a, token_b);

    let claimer_a = claimer_service(&org, token_a, InvitationType::User, &vault);
    let vault_b = MemoryDeviceVault::new();
    let claimer_b = {
        let addr = InvitationAddr::new(
            org.server.organization_id().clone(),
            token_b,
            InvitationType::User,
        );
        Arc::new(
            InviteService::new()
                .with_invited_transport(addr, org.server.invited(token_b))
                .with_device_storage(vault_b.clone()),
        )
    };

    // Both greets run on the same service, each with its own handle and
    // canceller; neither blocks the other
    let drive_claimer_b = async {
        let (handle, _) = claimer_b
            .claimer_retrieve_info()
            .await
            .map_err(|e| ClaimInProgressError::Internal {
                message: e.to_string(),
            })?;
        let canceller = claimer_b.new_canceller();
        claimer_b
            .claimer_initial_do_wait_peer(canceller, handle)
            .await?;
        claimer_b
            .claimer_in_progress_1_do_signify_trust(canceller, handle)
            .await?;
        claimer_b
            .claimer_in_progress_2_do_wait_peer_trust(canceller, handle)
            .await?;
        claimer_b
            .claimer_in_progress_3_do_claim(
                canceller,
                handle,
                Some(device_label("gravity-gun")),
                Some(
                    vestibule_core::HumanHandle::new("alyx.vance@blackmesa.nm", "Alyx Vance")
                        .expect("valid handle"),
                ),
            )
            .await
            .map(|_| ())
    };
    let drive_greeter_b = async {
        let handle = greeter
            .start_user_invitation_greet(token_b)
            .map_err(|e| GreetInProgressError::Internal {
                message: e.to_string(),
            })?;
        let canceller = greeter.new_canceller();
        greeter
            .greeter_initial_do_wait_peer(canceller, handle)
            .await?;
        greeter
            .greeter_in_progress_1_do_wait_peer_trust(canceller, handle)
            .await?;
        greeter
            .greeter_in_progress_2_do_signify_trust(canceller, handle)
            .await?;
        let s4 = greeter
            .greeter_in_progress_3_do_get_claim_requests(canceller, handle)
            .await?;
        greeter
            .greeter_in_progress_4_do_create_new_user(
                canceller,
                handle,
                s4.requested_human_handle.clone(),
                s4.requested_device_label.clone(),
                UserProfile::Standard,
            )
            .await
    };

    let (greet_a, claim_a, greet_b, claim_b) = tokio::join!(
        drive_user_greeter(&greeter, token_a, UserProfile::Standard),
        drive_user_claimer(&claimer_a),
        drive_greeter_b,
        drive_claimer_b,
    );
    greet_a.expect("first greeter side completed");
    claim_a.expect("first claimer side completed");
    greet_b.expect("second greeter side completed");
    claim_b.expect("second claimer side completed");

    // Admin plus the two enrollees
    assert_eq!(org.server.user_count(), 3);
    org.server
        .find_user_by_email(CLAIMER_EMAIL)
        .expect("first user enrolled");
    org.server
        .find_user_by_email("alyx.vance@blackmesa.nm")
        .expect("second user enrolled");
}

#[tokio::test]
async fn claimer_retrieve_info_reports_the_greeter() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let (_, info) = claimer.claimer_retrieve_info().await.expect("info retrieved");
    match info {
        InvitationInfo::User {
            claimer_email,
            greeter_user_id,
            greeter_human_handle,
        } => {
            assert_eq!(claimer_email, CLAIMER_EMAIL);
            assert_eq!(greeter_user_id, org.admin.user_id);
            assert_eq!(greeter_human_handle, org.admin.human_handle);
        }
        InvitationInfo::Device { .. } => panic!("expected a user invitation"),
    }
}

#[tokio::test]
async fn device_invitation_full_round_trip() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_device_invitation(false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::Device, &vault);

    let greet = async {
        let handle = greeter
            .start_device_invitation_greet(token)
            .expect("greet started");
        let canceller = greeter.new_canceller();
        greeter
            .greeter_initial_do_wait_peer(canceller, handle)
            .await?;
        greeter
            .greeter_in_progress_1_do_wait_peer_trust(canceller, handle)
            .await?;
        greeter
            .greeter_in_progress_2_do_signify_trust(canceller, handle)
            .await?;
        let s4 = greeter
            .greeter_in_progress_3_do_get_claim_requests(canceller, handle)
            .await?;
        // Device claims carry no human handle request
        assert!(s4.requested_human_handle.is_none());
        greeter
            .greeter_in_progress_4_do_create_new_device(
                canceller,
                handle,
                s4.requested_device_label.clone(),
            )
            .await
    };
    let claim = async {
        let (handle, info) = claimer
            .claimer_retrieve_info()
            .await
            .map_err(|e| ClaimInProgressError::Internal {
                message: e.to_string(),
            })?;
        assert!(matches!(info, InvitationInfo::Device { .. }));
        let canceller = claimer.new_canceller();
        claimer
            .claimer_initial_do_wait_peer(canceller, handle)
            .await?;
        claimer
            .claimer_in_progress_1_do_signify_trust(canceller, handle)
            .await?;
        claimer
            .claimer_in_progress_2_do_wait_peer_trust(canceller, handle)
            .await?;
        claimer
            .claimer_in_progress_3_do_claim(
                canceller,
                handle,
                Some(device_label("borealis")),
                None,
            )
            .await?;
        claimer
            .claimer_finalize_save_local_device(handle, DeviceSaveStrategy::Smartcard)
            .await
    };

    let (greet_result, claim_result) = tokio::join!(greet, claim);
    greet_result.expect("greeter side completed");
    let available = claim_result.expect("claimer side completed");

    // The new device belongs to the greeter's own account
    assert_eq!(available.user_id, org.admin.user_id);
    assert_eq!(available.human_handle, org.admin.human_handle);
    assert_eq!(available.device_label, Some(device_label("borealis")));
    assert_eq!(org.server.device_count_for(org.admin.user_id), 2);
}

#[tokio::test]
async fn stage_order_violation_is_rejected() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let (handle, _) = claimer.claimer_retrieve_info().await.expect("info retrieved");
    let canceller = claimer.new_canceller();
    // Jumping straight to stage 1 without the key agreement
    let err = claimer
        .claimer_in_progress_1_do_signify_trust(canceller, handle)
        .await
        .expect_err("stage order must be enforced");
    assert!(matches!(err, ClaimInProgressError::Internal { .. }));

    // The handle survives the rejection and still works in order
    let (greet_result, stage1) = tokio::join!(
        drive_user_greeter(&greeter, token, UserProfile::Standard),
        async {
            let s1 = claimer
                .claimer_initial_do_wait_peer(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_1_do_signify_trust(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_2_do_wait_peer_trust(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_3_do_claim(canceller, handle, None, Some(claimer_handle()))
                .await?;
            Ok::<_, ClaimInProgressError>(s1)
        }
    );
    greet_result.expect("greeter side completed");
    stage1.expect("claimer recovered after the ordering error");
}

#[tokio::test]
async fn cancelled_wait_keeps_the_stage_for_retry() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let (handle, _) = claimer.claimer_retrieve_info().await.expect("info retrieved");
    let canceller = claimer.new_canceller();

    // Nobody is greeting yet, so the wait blocks until cancelled
    let waiting = {
        let claimer = claimer.clone();
        tokio::spawn(async move {
            claimer
                .claimer_initial_do_wait_peer(canceller, handle)
                .await
        })
    };
    while claimer.cancel(canceller).is_err() {
        tokio::task::yield_now().await;
    }
    let err = waiting
        .await
        .expect("task finished")
        .expect_err("wait was cancelled");
    assert_eq!(err, ClaimInProgressError::Cancelled);

    // Same handle, same stage: the retry runs the handshake to completion
    let (greet_result, claim_result) = tokio::join!(
        drive_user_greeter(&greeter, token, UserProfile::Standard),
        async {
            claimer
                .claimer_initial_do_wait_peer(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_1_do_signify_trust(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_2_do_wait_peer_trust(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_3_do_claim(canceller, handle, None, Some(claimer_handle()))
                .await?;
            claimer
                .claimer_finalize_save_local_device(
                    handle,
                    DeviceSaveStrategy::Password {
                        password: "crowbar".into(),
                    },
                )
                .await
        }
    );
    greet_result.expect("greeter side completed");
    claim_result.expect("claimer side completed after cancel");
}

#[tokio::test]
async fn greeter_cancel_then_retry_on_the_same_handle() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let handle = greeter
        .start_user_invitation_greet(token)
        .expect("greet started");
    let canceller = greeter.new_canceller();
    let waiting = {
        let greeter = greeter.clone();
        tokio::spawn(async move { greeter.greeter_initial_do_wait_peer(canceller, handle).await })
    };
    while greeter.cancel(canceller).is_err() {
        tokio::task::yield_now().await;
    }
    let err = waiting
        .await
        .expect("task finished")
        .expect_err("wait was cancelled");
    assert_eq!(err, GreetInProgressError::Cancelled);

    // The canceller is unbound again once the operation returned
    assert!(greeter.cancel(canceller).is_err());

    let (greet_result, claim_result) = tokio::join!(
        async {
            let s1 = greeter
                .greeter_initial_do_wait_peer(canceller, handle)
                .await?;
            greeter
                .greeter_in_progress_1_do_wait_peer_trust(canceller, handle)
                .await?;
            greeter
                .greeter_in_progress_2_do_signify_trust(canceller, handle)
                .await?;
            let s4 = greeter
                .greeter_in_progress_3_do_get_claim_requests(canceller, handle)
                .await?;
            greeter
                .greeter_in_progress_4_do_create_new_user(
                    canceller,
                    handle,
                    s4.requested_human_handle.clone(),
                    s4.requested_device_label.clone(),
                    UserProfile::Outsider,
                )
                .await?;
            Ok::<_, GreetInProgressError>(s1.greeter_sas)
        },
        drive_user_claimer(&claimer),
    );
    greet_result.expect("greeter side completed after cancel");
    claim_result.expect("claimer side completed");
    let (_, profile) = org
        .server
        .find_user_by_email(CLAIMER_EMAIL)
        .expect("user enrolled");
    assert_eq!(profile, UserProfile::Outsider);
}

#[tokio::test]
async fn one_canceller_cannot_drive_two_operations_at_once() {
    let org = TestOrganization::new();
    let greeter = greeter_service(&org);
    let (token_a, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("first invitation created");
    let (token_b, _) = greeter
        .new_user_invitation("alyx.vance@blackmesa.nm".into(), false)
        .await
        .expect("second invitation created");

    let handle_a = greeter
        .start_user_invitation_greet(token_a)
        .expect("greet started");
    let handle_b = greeter
        .start_user_invitation_greet(token_b)
        .expect("greet started");
    let canceller = greeter.new_canceller();

    // First operation takes the canceller and suspends waiting for a claimer
    let waiting = {
        let greeter = greeter.clone();
        tokio::spawn(
            async move { greeter.greeter_initial_do_wait_peer(canceller, handle_a).await },
        )
    };
    while !org.server.exchange_started(token_a) {
        tokio::task::yield_now().await;
    }

    // Reusing the same canceller for a second operation is refused without
    // touching the first operation's binding
    let err = greeter
        .greeter_initial_do_wait_peer(canceller, handle_b)
        .await
        .expect_err("the canceller is taken");
    assert!(matches!(err, GreetInProgressError::Internal { .. }));

    // The first operation is still cancellable through the token
    greeter.cancel(canceller).expect("binding survived the refused reuse");
    let err = waiting
        .await
        .expect("task finished")
        .expect_err("wait was cancelled");
    assert_eq!(err, GreetInProgressError::Cancelled);

    // The refused operation's handle kept its stage: it binds and runs now
    let waiting_b = {
        let greeter = greeter.clone();
        tokio::spawn(
            async move { greeter.greeter_initial_do_wait_peer(canceller, handle_b).await },
        )
    };
    while greeter.cancel(canceller).is_err() {
        tokio::task::yield_now().await;
    }
    let err = waiting_b
        .await
        .expect("task finished")
        .expect_err("wait was cancelled");
    assert_eq!(err, GreetInProgressError::Cancelled);
}

#[tokio::test]
async fn peer_reset_rewinds_the_handle_to_the_initial_stage() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let (handle, _) = claimer.claimer_retrieve_info().await.expect("info retrieved");
    let canceller = claimer.new_canceller();
    let waiting = {
        let claimer = claimer.clone();
        tokio::spawn(async move {
            claimer
                .claimer_initial_do_wait_peer(canceller, handle)
                .await
        })
    };
    while !org.server.exchange_started(token) {
        tokio::task::yield_now().await;
    }
    org.server.reset_exchange(token);
    let err = waiting
        .await
        .expect("task finished")
        .expect_err("the reset interrupted the wait");
    assert_eq!(err, ClaimInProgressError::PeerReset);

    // The handle is back at the initial stage: a full run succeeds
    let (greet_result, claim_result) = tokio::join!(
        drive_user_greeter(&greeter, token, UserProfile::Standard),
        async {
            claimer
                .claimer_initial_do_wait_peer(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_1_do_signify_trust(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_2_do_wait_peer_trust(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_3_do_claim(canceller, handle, None, Some(claimer_handle()))
                .await
        }
    );
    greet_result.expect("greeter side completed");
    claim_result.expect("claimer side completed after reset");
}

#[tokio::test]
async fn tampered_nonce_is_caught_by_the_commitment_check() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    // The nonce reaching the greeter no longer matches the claimer's
    // commitment
    org.server.tamper_next_claimer_nonce();

    let handle = greeter
        .start_user_invitation_greet(token)
        .expect("greet started");
    let canceller = greeter.new_canceller();
    let greet = greeter.greeter_initial_do_wait_peer(canceller, handle);
    let claim = async {
        let (handle, _) = claimer
            .claimer_retrieve_info()
            .await
            .map_err(|e| ClaimInProgressError::Internal {
                message: e.to_string(),
            })?;
        let canceller = claimer.new_canceller();
        claimer
            .claimer_initial_do_wait_peer(canceller, handle)
            .await
    };
    let (greet_result, claim_result) = tokio::join!(greet, claim);

    // The claimer's key agreement itself went through; only the greeter
    // can see the commitment break
    claim_result.expect("claimer side finished its half");
    let err = greet_result.expect_err("the tampered nonce must be rejected");
    assert_eq!(err, GreetInProgressError::NonceMismatch);

    // A broken commitment is fatal: the greeter handle is gone
    let err = greeter
        .greeter_initial_do_wait_peer(canceller, handle)
        .await
        .expect_err("the handle was released");
    assert!(matches!(err, GreetInProgressError::Internal { .. }));
}

#[tokio::test]
async fn corrupted_claim_request_is_rejected_by_the_greeter() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    org.server.tamper_next_claim_payload();

    // The claimer blocks on the confirmation that never comes; it runs
    // detached and dies with the runtime
    {
        let claimer = claimer.clone();
        tokio::spawn(async move {
            let _ = drive_user_claimer(&claimer).await;
        });
    }

    let err = drive_user_greeter(&greeter, token, UserProfile::Standard)
        .await
        .expect_err("the sealed request fails authentication");
    assert_eq!(err, GreetInProgressError::CorruptedClaimRequest);
    assert_eq!(org.server.user_count(), 1);
}

#[tokio::test]
async fn corrupted_confirmation_is_rejected_by_the_claimer() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    org.server.tamper_next_confirmation();

    let claim = async {
        let (handle, _) = claimer
            .claimer_retrieve_info()
            .await
            .map_err(|e| ClaimInProgressError::Internal {
                message: e.to_string(),
            })?;
        let canceller = claimer.new_canceller();
        claimer
            .claimer_initial_do_wait_peer(canceller, handle)
            .await?;
        claimer
            .claimer_in_progress_1_do_signify_trust(canceller, handle)
            .await?;
        claimer
            .claimer_in_progress_2_do_wait_peer_trust(canceller, handle)
            .await?;
        claimer
            .claimer_in_progress_3_do_claim(canceller, handle, None, Some(claimer_handle()))
            .await
            .map(|_| ())
    };
    let (greet_result, claim_result) = tokio::join!(
        drive_user_greeter(&greeter, token, UserProfile::Standard),
        claim,
    );

    // Server-side the enrollment happened; the claimer just cannot trust
    // what came back
    greet_result.expect("greeter side completed");
    let err = claim_result.expect_err("the sealed confirmation fails authentication");
    assert_eq!(err, ClaimInProgressError::CorruptedConfirmation);
    assert!(vault.saved_devices().is_empty());
}

#[tokio::test]
async fn offline_failures_keep_the_stage_for_retry() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let (handle, _) = claimer.claimer_retrieve_info().await.expect("info retrieved");
    let canceller = claimer.new_canceller();

    org.server.set_offline(true);
    let err = claimer
        .claimer_initial_do_wait_peer(canceller, handle)
        .await
        .expect_err("server is offline");
    assert_eq!(err, ClaimInProgressError::Offline);
    org.server.set_offline(false);

    let (greet_result, claim_result) = tokio::join!(
        drive_user_greeter(&greeter, token, UserProfile::Standard),
        async {
            claimer
                .claimer_initial_do_wait_peer(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_1_do_signify_trust(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_2_do_wait_peer_trust(canceller, handle)
                .await?;
            claimer
                .claimer_in_progress_3_do_claim(canceller, handle, None, Some(claimer_handle()))
                .await
        }
    );
    greet_result.expect("greeter side completed");
    claim_result.expect("claimer side completed after coming back online");
}

#[tokio::test]
async fn bad_timestamp_carries_both_clocks_and_is_retryable() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    // The server clock runs an hour ahead; the greeter's timestamps land
    // outside the ballpark
    org.server.set_clock_skew(chrono::Duration::hours(1));

    let greet = async {
        let handle = greeter
            .start_user_invitation_greet(token)
            .map_err(|e| GreetInProgressError::Internal {
                message: e.to_string(),
            })?;
        let canceller = greeter.new_canceller();
        greeter
            .greeter_initial_do_wait_peer(canceller, handle)
            .await?;
        greeter
            .greeter_in_progress_1_do_wait_peer_trust(canceller, handle)
            .await?;
        greeter
            .greeter_in_progress_2_do_signify_trust(canceller, handle)
            .await?;
        let s4 = greeter
            .greeter_in_progress_3_do_get_claim_requests(canceller, handle)
            .await?;

        let err = greeter
            .greeter_in_progress_4_do_create_new_user(
                canceller,
                handle,
                s4.requested_human_handle.clone(),
                s4.requested_device_label.clone(),
                UserProfile::Standard,
            )
            .await
            .expect_err("clock skew must be rejected");
        match &err {
            GreetInProgressError::BadTimestamp(payload) => {
                assert_eq!(payload.ballpark_client_early_offset, 300);
                assert_eq!(payload.ballpark_client_late_offset, 320);
                assert!(payload.server_timestamp > payload.client_timestamp);
            }
            other => panic!("expected BadTimestamp, got {other:?}"),
        }

        // Fix the clock; the handle is still at the create stage
        org.server.set_clock_skew(chrono::Duration::zero());
        greeter
            .greeter_in_progress_4_do_create_new_user(
                canceller,
                handle,
                s4.requested_human_handle.clone(),
                s4.requested_device_label.clone(),
                UserProfile::Standard,
            )
            .await
    };

    let (greet_result, claim_result) = tokio::join!(greet, drive_user_claimer(&claimer));
    greet_result.expect("greeter side completed after fixing the clock");
    claim_result.expect("claimer side completed");
}

#[tokio::test]
async fn active_users_limit_blocks_the_creation() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    // The organization is already full: only the admin fits
    org.server.set_active_users_limit(Some(1));

    // The claimer blocks on the confirmation that never comes; it runs
    // detached and dies with the runtime
    {
        let claimer = claimer.clone();
        tokio::spawn(async move {
            let _ = drive_user_claimer(&claimer).await;
        });
    }

    let err = drive_user_greeter(&greeter, token, UserProfile::Standard)
        .await
        .expect_err("the limit must block the creation");
    assert_eq!(err, GreetInProgressError::ActiveUsersLimitReached);
    assert_eq!(org.server.user_count(), 1);
}

#[tokio::test]
async fn used_invitation_cannot_be_greeted_again() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let (greet_result, claim_result) = tokio::join!(
        drive_user_greeter(&greeter, token, UserProfile::Standard),
        drive_user_claimer(&claimer),
    );
    greet_result.expect("greeter side completed");
    claim_result.expect("claimer side completed");

    // The enrollment consumed the invitation
    let handle = greeter
        .start_user_invitation_greet(token)
        .expect("starting only allocates a handle");
    let canceller = greeter.new_canceller();
    let err = greeter
        .greeter_initial_do_wait_peer(canceller, handle)
        .await
        .expect_err("the invitation is spent");
    assert_eq!(err, GreetInProgressError::AlreadyUsed);

    // And the claimer side sees the same from a fresh retrieve
    let late_claimer = claimer_service(&org, token, InvitationType::User, &vault);
    let err = late_claimer
        .claimer_retrieve_info()
        .await
        .expect_err("the invitation is spent");
    assert_eq!(
        err,
        vestibule_invite::ClaimerRetrieveInfoError::AlreadyUsed
    );
}

#[tokio::test]
async fn aborting_releases_the_handle_for_good() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let (handle, _) = claimer.claimer_retrieve_info().await.expect("info retrieved");
    claimer.abort_operation(handle).expect("abort is infallible");
    // A second abort is a no-op, not an error
    claimer.abort_operation(handle).expect("abort is idempotent");

    let canceller = claimer.new_canceller();
    let err = claimer
        .claimer_initial_do_wait_peer(canceller, handle)
        .await
        .expect_err("the handle is gone");
    assert!(matches!(err, ClaimInProgressError::Internal { .. }));
}

#[tokio::test]
async fn failed_save_keeps_the_device_for_another_attempt() {
    let org = TestOrganization::new();
    let vault = MemoryDeviceVault::new();
    let greeter = greeter_service(&org);
    let (token, _) = greeter
        .new_user_invitation(CLAIMER_EMAIL.into(), false)
        .await
        .expect("invitation created");
    let claimer = claimer_service(&org, token, InvitationType::User, &vault);

    let claim = async {
        let (handle, _) = claimer
            .claimer_retrieve_info()
            .await
            .map_err(|e| ClaimInProgressError::Internal {
                message: e.to_string(),
            })?;
        let canceller = claimer.new_canceller();
        claimer
            .claimer_initial_do_wait_peer(canceller, handle)
            .await?;
        claimer
            .claimer_in_progress_1_do_signify_trust(canceller, handle)
            .await?;
        claimer
            .claimer_in_progress_2_do_wait_peer_trust(canceller, handle)
            .await?;
        claimer
            .claimer_in_progress_3_do_claim(canceller, handle, None, Some(claimer_handle()))
            .await?;

        vault.fail_next_save();
        let err = claimer
            .claimer_finalize_save_local_device(
                handle,
                DeviceSaveStrategy::Password {
                    password: "crowbar".into(),
                },
            )
            .await
            .expect_err("the vault refused the save");
        assert!(matches!(err, ClaimInProgressError::SaveDevice(_)));

        // The enrollment already happened; only the save is retried
        claimer
            .claimer_finalize_save_local_device(handle, DeviceSaveStrategy::Smartcard)
            .await
    };

    let (greet_result, claim_result) = tokio::join!(
        drive_user_greeter(&greeter, token, UserProfile::Standard),
        claim,
    );
    greet_result.expect("greeter side completed");
    let available = claim_result.expect("second save attempt succeeded");
    assert_eq!(available.human_handle, Some(claimer_handle()));
    assert_eq!(vault.saved_devices().len(), 1);
}
