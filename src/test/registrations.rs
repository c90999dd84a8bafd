#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::auth::{Role, UserStatus};
    use crate::db::{get_registrations_for_program, update_user_status};
    use crate::error::AppError;
    use crate::models::{DeliveryChannel, PaymentStatus, RegistrationStatus};
    use crate::registrations::{
        REFUND_NOTICE, RegistrationInput, ReviewDecision, accept, bulk_review, cancel, complete,
        enroll, record_payment, register, reject, update_notes, withdraw,
    };
    use crate::test::test_db::{FailingTransport, RecordingTransport, TestDbBuilder};
    use crate::test::test_utils::{
        CENTER_ADMIN, HIDDEN_PROGRAM, INSTRUCTOR, OPEN_PROGRAM, SECOND_USER, SINGLE_SEAT_PROGRAM,
        SUPER_ADMIN, USER, create_standard_test_db,
    };

    const ADMIN_COUNT: i64 = 2;

    fn input() -> RegistrationInput {
        RegistrationInput::default()
    }

    #[rocket::async_test]
    async fn test_full_lifecycle_to_completion() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let registration = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .expect("Registration should succeed");

        assert_eq!(registration.status, RegistrationStatus::Pending);
        assert_eq!(registration.payment_status, PaymentStatus::Unpaid);
        assert_eq!(registration.user_email, USER);
        assert_eq!(registration.user_phone.as_deref(), Some("+1 555 000 1111"));
        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 1);

        let accepted = accept(&test_db.pool, &notifier, &admin, registration.id)
            .await
            .expect("Accept should succeed");
        assert_eq!(accepted.status, RegistrationStatus::Accepted);
        assert_eq!(accepted.reviewed_by, Some(admin.id));
        assert!(accepted.reviewed_at.is_some());

        let enrolled = enroll(&test_db.pool, &notifier, &admin, registration.id)
            .await
            .expect("Enroll should succeed");
        assert_eq!(enrolled.status, RegistrationStatus::Enrolled);

        let completed = complete(&test_db.pool, &notifier, &admin, registration.id)
            .await
            .expect("Complete should succeed");
        assert_eq!(completed.status, RegistrationStatus::Completed);

        // Seat is held for the whole lifecycle
        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 1);

        // One user copy and one copy per admin for each of the four steps
        assert_eq!(test_db.notification_log_count_for(user.id).await, 4);
        assert_eq!(test_db.notification_log_count().await, 4 + 4 * ADMIN_COUNT);
    }

    #[rocket::async_test]
    async fn test_duplicate_registration_is_refused() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .expect("First registration should succeed");

        let result = register(&test_db.pool, &notifier, &user, program_id, input()).await;

        match result {
            Err(AppError::PreconditionFailed(msg)) => {
                assert!(msg.contains("pending"), "Unexpected message: {}", msg)
            }
            other => panic!("Expected PreconditionFailed, got {:?}", other),
        }

        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 1);
        assert_eq!(test_db.registration_count(program_id).await, 1);
    }

    #[rocket::async_test]
    async fn test_full_program_refuses_registration() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let second = test_db.user(SECOND_USER).await;
        let program_id = test_db.program_id(SINGLE_SEAT_PROGRAM).unwrap();

        register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .expect("Last seat should be available");

        let program = test_db.program(SINGLE_SEAT_PROGRAM).await;
        assert_eq!(program.seats_left(), 0);

        let logs_before = test_db.notification_log_count().await;
        let result = register(&test_db.pool, &notifier, &second, program_id, input()).await;

        assert!(matches!(result, Err(AppError::PreconditionFailed(ref m)) if m.contains("full")));
        assert_eq!(test_db.program(SINGLE_SEAT_PROGRAM).await.current_participants, 1);
        assert_eq!(test_db.registration_count(program_id).await, 1);
        assert_eq!(
            test_db.notification_log_count().await,
            logs_before,
            "A refused registration sends nothing"
        );
    }

    #[rocket::async_test]
    async fn test_capacity_boundary() {
        let test_db = TestDbBuilder::new()
            .user("a@example.com", "A")
            .user("b@example.com", "B")
            .user("c@example.com", "C")
            .center_admin(CENTER_ADMIN, "Ada Admin")
            .program("Crane Basics", 2)
            .build()
            .await
            .expect("Failed to build test database");
        let notifier = test_db.dispatcher();
        let program_id = test_db.program_id("Crane Basics").unwrap();

        for email in ["a@example.com", "b@example.com"] {
            let user = test_db.user(email).await;
            register(&test_db.pool, &notifier, &user, program_id, input())
                .await
                .expect("Seat should be available");
        }

        assert_eq!(test_db.program("Crane Basics").await.current_participants, 2);

        let third = test_db.user("c@example.com").await;
        let result = register(&test_db.pool, &notifier, &third, program_id, input()).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));
        assert_eq!(test_db.program("Crane Basics").await.current_participants, 2);
    }

    #[rocket::async_test]
    async fn test_concurrent_registrations_for_last_seat() {
        let test_db = TestDbBuilder::new()
            .user(USER, "Uma User")
            .user(SECOND_USER, "Sam Second")
            .program(SINGLE_SEAT_PROGRAM, 1)
            .on_disk(4)
            .build()
            .await
            .expect("Failed to build test database");
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let second = test_db.user(SECOND_USER).await;
        let program_id = test_db.program_id(SINGLE_SEAT_PROGRAM).unwrap();

        // Separate connections, so both transactions can be open at once
        let (first, other) = rocket::tokio::join!(
            register(&test_db.pool, &notifier, &user, program_id, input()),
            register(&test_db.pool, &notifier, &second, program_id, input()),
        );

        assert_eq!(
            first.is_ok() as u8 + other.is_ok() as u8,
            1,
            "Exactly one registrant gets the last seat"
        );
        let loser = if first.is_ok() { other } else { first };
        assert!(
            matches!(
                loser,
                Err(AppError::PreconditionFailed(_)) | Err(AppError::StoreUnavailable(_))
            ),
            "Unexpected outcome for the second registrant: {:?}",
            loser
        );

        let program = test_db.program(SINGLE_SEAT_PROGRAM).await;
        assert_eq!(program.current_participants, 1);
        assert!(program.current_participants <= program.max_participants);
        assert_eq!(test_db.registration_count(program_id).await, 1);
    }

    #[rocket::async_test]
    async fn test_register_then_withdraw_restores_counter() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let before = test_db.program(OPEN_PROGRAM).await.current_participants;

        let registration = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .expect("Registration should succeed");
        let withdrawn = withdraw(&test_db.pool, &notifier, &user, registration.id)
            .await
            .expect("Withdraw should succeed");

        assert_eq!(withdrawn.status, RegistrationStatus::Cancelled);
        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, before);

        // A withdrawn registration no longer blocks a new one
        let again = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .expect("Re-registration should succeed");
        assert_ne!(again.id, registration.id);
        assert_eq!(again.status, RegistrationStatus::Pending);
    }

    #[rocket::async_test]
    async fn test_withdraw_requires_owner_and_pending() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let second = test_db.user(SECOND_USER).await;
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let registration = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .unwrap();

        let result = withdraw(&test_db.pool, &notifier, &second, registration.id).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));

        accept(&test_db.pool, &notifier, &admin, registration.id)
            .await
            .unwrap();

        let result = withdraw(&test_db.pool, &notifier, &user, registration.id).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));
        assert_eq!(
            test_db.registration(registration.id).await.status,
            RegistrationStatus::Accepted
        );
    }

    #[rocket::async_test]
    async fn test_reject_twice_releases_one_seat() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let registration = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .unwrap();
        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 1);

        let rejected = reject(&test_db.pool, &notifier, &admin, registration.id)
            .await
            .expect("First reject should succeed");
        assert_eq!(rejected.status, RegistrationStatus::Rejected);
        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 0);

        let logs_after_first = test_db.notification_log_count().await;

        let result = reject(&test_db.pool, &notifier, &admin, registration.id).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));
        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 0);
        assert_eq!(test_db.notification_log_count().await, logs_after_first);
    }

    #[rocket::async_test]
    async fn test_pending_cannot_jump_to_completed() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let registration = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .unwrap();

        let result = complete(&test_db.pool, &notifier, &admin, registration.id).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));

        let result = enroll(&test_db.pool, &notifier, &admin, registration.id).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));

        assert_eq!(
            test_db.registration(registration.id).await.status,
            RegistrationStatus::Pending
        );
    }

    #[rocket::async_test]
    async fn test_missing_registration_is_precondition_failure() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let admin = test_db.user(CENTER_ADMIN).await;

        let result = accept(&test_db.pool, &notifier, &admin, 9999).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));
    }

    #[rocket::async_test]
    async fn test_bulk_reject_releases_every_seat() {
        let test_db = TestDbBuilder::new()
            .user("a@example.com", "A")
            .user("b@example.com", "B")
            .user("c@example.com", "C")
            .center_admin(CENTER_ADMIN, "Ada Admin")
            .super_admin(SUPER_ADMIN, "Root Admin")
            .program("Scaffolding", 10)
            .build()
            .await
            .expect("Failed to build test database");
        let notifier = test_db.dispatcher();
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id("Scaffolding").unwrap();

        let mut ids = Vec::new();
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            let user = test_db.user(email).await;
            let registration = register(&test_db.pool, &notifier, &user, program_id, input())
                .await
                .unwrap();
            ids.push(registration.id);
        }

        assert_eq!(test_db.program("Scaffolding").await.current_participants, 3);
        let logs_before = test_db.notification_log_count().await;

        let outcome = bulk_review(
            &test_db.pool,
            &notifier,
            &admin,
            program_id,
            None,
            ReviewDecision::Reject,
        )
        .await
        .expect("Bulk reject should succeed");

        assert_eq!(outcome.succeeded.len(), 3);
        assert!(outcome.failed.is_empty());
        assert!(outcome.skipped.is_empty());
        assert_eq!(test_db.program("Scaffolding").await.current_participants, 0);

        // Three applicant copies plus three for each admin
        assert_eq!(
            test_db.notification_log_count().await - logs_before,
            3 + 3 * ADMIN_COUNT
        );

        let pending = get_registrations_for_program(
            &test_db.pool,
            program_id,
            Some(RegistrationStatus::Pending),
        )
        .await
        .unwrap();
        assert!(pending.is_empty());
    }

    #[rocket::async_test]
    async fn test_bulk_accept_reports_each_item() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let second = test_db.user(SECOND_USER).await;
        let admin = test_db.user(CENTER_ADMIN).await;
        let open_id = test_db.program_id(OPEN_PROGRAM).unwrap();
        let single_id = test_db.program_id(SINGLE_SEAT_PROGRAM).unwrap();

        let pending = register(&test_db.pool, &notifier, &user, open_id, input())
            .await
            .unwrap();
        let already_withdrawn = register(&test_db.pool, &notifier, &second, open_id, input())
            .await
            .unwrap();
        withdraw(&test_db.pool, &notifier, &second, already_withdrawn.id)
            .await
            .unwrap();
        let other_program = register(&test_db.pool, &notifier, &second, single_id, input())
            .await
            .unwrap();

        let ids = [pending.id, already_withdrawn.id, other_program.id, 4242];
        let outcome = bulk_review(
            &test_db.pool,
            &notifier,
            &admin,
            open_id,
            Some(&ids),
            ReviewDecision::Accept,
        )
        .await
        .expect("Bulk accept should succeed");

        assert_eq!(outcome.succeeded, vec![pending.id]);
        assert_eq!(outcome.skipped, vec![already_withdrawn.id, other_program.id]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].registration_id, 4242);

        assert_eq!(
            test_db.registration(other_program.id).await.status,
            RegistrationStatus::Pending
        );
    }

    #[rocket::async_test]
    async fn test_notification_failure_does_not_roll_back() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher_with(Arc::new(FailingTransport), DeliveryChannel::Email);
        let user = test_db.user(USER).await;
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let registration = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .expect("Registration should succeed even if mail is down");

        let accepted = accept(&test_db.pool, &notifier, &admin, registration.id)
            .await
            .expect("Accept should succeed even if mail is down");

        assert_eq!(
            test_db.registration(accepted.id).await.status,
            RegistrationStatus::Accepted
        );
        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 1);

        // Every attempt is still recorded, as failed
        let expected = 2 + 2 * ADMIN_COUNT;
        assert_eq!(test_db.notification_log_count_with_status("failed").await, expected);
        assert_eq!(test_db.notification_log_count().await, expected);
    }

    #[rocket::async_test]
    async fn test_applicant_and_admins_are_emailed() {
        let test_db = create_standard_test_db().await;
        let transport = Arc::new(RecordingTransport::default());
        let notifier = test_db.dispatcher_with(transport.clone(), DeliveryChannel::Email);
        let user = test_db.user(USER).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .unwrap();

        let mut recipients = transport.email_recipients();
        recipients.sort();
        assert_eq!(recipients, vec![CENTER_ADMIN, SUPER_ADMIN, USER]);
        assert_eq!(transport.sms_count(), 0);
    }

    #[rocket::async_test]
    async fn test_reviewers_cannot_review_themselves() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let own = register(&test_db.pool, &notifier, &admin, program_id, input())
            .await
            .expect("Admins may register themselves");

        let result = accept(&test_db.pool, &notifier, &admin, own.id).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));

        let root = test_db.user(SUPER_ADMIN).await;
        accept(&test_db.pool, &notifier, &root, own.id)
            .await
            .expect("Another admin may review it");
    }

    #[rocket::async_test]
    async fn test_review_requires_admin_role() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let second = test_db.user(SECOND_USER).await;
        let instructor = test_db.user(INSTRUCTOR).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let registration = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .unwrap();

        for actor in [&second, &instructor] {
            let result = accept(&test_db.pool, &notifier, actor, registration.id).await;
            assert!(matches!(result, Err(AppError::Authorization(_))));
        }

        assert_eq!(
            test_db.registration(registration.id).await.status,
            RegistrationStatus::Pending
        );
    }

    #[rocket::async_test]
    async fn test_inactive_accounts_are_refused() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user_id = test_db.user_id(USER).unwrap();
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        update_user_status(&test_db.pool, user_id, UserStatus::Suspended)
            .await
            .unwrap();
        let suspended = test_db.user(USER).await;

        let result = register(&test_db.pool, &notifier, &suspended, program_id, input()).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 0);
    }

    #[rocket::async_test]
    async fn test_hidden_programs_only_for_staff() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let instructor = test_db.user(INSTRUCTOR).await;
        let program_id = test_db.program_id(HIDDEN_PROGRAM).unwrap();

        let result = register(&test_db.pool, &notifier, &user, program_id, input()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        assert_eq!(instructor.role, Role::Instructor);
        register(&test_db.pool, &notifier, &instructor, program_id, input())
            .await
            .expect("Staff can register for hidden programs");
    }

    #[rocket::async_test]
    async fn test_invalid_phone_is_rejected_before_any_write() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let second = test_db.user(SECOND_USER).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let result = register(
            &test_db.pool,
            &notifier,
            &second,
            program_id,
            RegistrationInput {
                phone: Some("not a phone".to_string()),
                notes: None,
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(test_db.registration_count(program_id).await, 0);
        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 0);
    }

    #[rocket::async_test]
    async fn test_cancel_paid_registration_returns_refund_notice() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let second = test_db.user(SECOND_USER).await;
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let paid = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .unwrap();
        accept(&test_db.pool, &notifier, &admin, paid.id).await.unwrap();
        record_payment(&test_db.pool, &notifier, &admin, paid.id)
            .await
            .unwrap();

        let unpaid = register(&test_db.pool, &notifier, &second, program_id, input())
            .await
            .unwrap();
        accept(&test_db.pool, &notifier, &admin, unpaid.id)
            .await
            .unwrap();

        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 2);

        let outcome = cancel(&test_db.pool, &notifier, &user, paid.id)
            .await
            .expect("Cancel should succeed");
        assert_eq!(outcome.registration.status, RegistrationStatus::Cancelled);
        assert_eq!(outcome.refund_notice.as_deref(), Some(REFUND_NOTICE));

        let outcome = cancel(&test_db.pool, &notifier, &second, unpaid.id)
            .await
            .expect("Cancel should succeed");
        assert!(outcome.refund_notice.is_none());

        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 0);
    }

    #[rocket::async_test]
    async fn test_cancel_requires_accepted_status() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let registration = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .unwrap();

        let result = cancel(&test_db.pool, &notifier, &user, registration.id).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));
    }

    #[rocket::async_test]
    async fn test_record_payment_rules() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let registration = register(&test_db.pool, &notifier, &user, program_id, input())
            .await
            .unwrap();

        let result = record_payment(&test_db.pool, &notifier, &admin, registration.id).await;
        assert!(
            matches!(result, Err(AppError::PreconditionFailed(_))),
            "Pending registrations cannot be paid"
        );

        accept(&test_db.pool, &notifier, &admin, registration.id)
            .await
            .unwrap();
        let paid = record_payment(&test_db.pool, &notifier, &admin, registration.id)
            .await
            .expect("Payment should be recorded");
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.status, RegistrationStatus::Accepted);

        let result = record_payment(&test_db.pool, &notifier, &admin, registration.id).await;
        assert!(matches!(result, Err(AppError::PreconditionFailed(_))));
    }

    #[rocket::async_test]
    async fn test_update_notes_is_admin_only() {
        let test_db = create_standard_test_db().await;
        let notifier = test_db.dispatcher();
        let user = test_db.user(USER).await;
        let admin = test_db.user(CENTER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let registration = register(
            &test_db.pool,
            &notifier,
            &user,
            program_id,
            RegistrationInput {
                phone: None,
                notes: Some("Vegetarian lunch".to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(registration.notes, "Vegetarian lunch");

        let logs_before = test_db.notification_log_count().await;

        let updated = update_notes(&test_db.pool, &admin, registration.id, "Needs ramp access")
            .await
            .expect("Admin can edit notes");
        assert_eq!(updated.notes, "Needs ramp access");
        assert_eq!(updated.status, RegistrationStatus::Pending);
        assert_eq!(test_db.notification_log_count().await, logs_before);

        let result = update_notes(&test_db.pool, &user, registration.id, "sneaky").await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[rocket::async_test]
    async fn test_center_admin_cannot_review_higher_accounts() {
        let test_db = TestDbBuilder::new()
            .center_admin(CENTER_ADMIN, "Ada Admin")
            .center_admin("deputy@example.com", "Dee Deputy")
            .super_admin(SUPER_ADMIN, "Root Admin")
            .program(OPEN_PROGRAM, 10)
            .build()
            .await
            .expect("Failed to build test database");
        let notifier = test_db.dispatcher();
        let admin = test_db.user(CENTER_ADMIN).await;
        let deputy = test_db.user("deputy@example.com").await;
        let root = test_db.user(SUPER_ADMIN).await;
        let program_id = test_db.program_id(OPEN_PROGRAM).unwrap();

        let root_registration = register(&test_db.pool, &notifier, &root, program_id, input())
            .await
            .unwrap();
        let deputy_registration = register(&test_db.pool, &notifier, &deputy, program_id, input())
            .await
            .unwrap();
        let logs_before = test_db.notification_log_count().await;

        for registration_id in [root_registration.id, deputy_registration.id] {
            let result = accept(&test_db.pool, &notifier, &admin, registration_id).await;
            assert!(matches!(result, Err(AppError::Authorization(_))));

            let result = reject(&test_db.pool, &notifier, &admin, registration_id).await;
            assert!(matches!(result, Err(AppError::Authorization(_))));

            let result = update_notes(&test_db.pool, &admin, registration_id, "Overwritten").await;
            assert!(matches!(result, Err(AppError::Authorization(_))));

            let unchanged = test_db.registration(registration_id).await;
            assert_eq!(unchanged.status, RegistrationStatus::Pending);
            assert_eq!(unchanged.notes, "");
        }

        assert_eq!(test_db.program(OPEN_PROGRAM).await.current_participants, 2);
        assert_eq!(test_db.notification_log_count().await, logs_before);

        let accepted = accept(&test_db.pool, &notifier, &root, deputy_registration.id)
            .await
            .expect("Super admin reviews center admin registrations");
        assert_eq!(accepted.status, RegistrationStatus::Accepted);
    }
}
