//! Message-processing semantics: the validity predicates, the quadratic
//! credit rule, and the engine invariants they maintain.

mod common;

use ark_bn254::Fr;
use maci_core::command::Message;
use maci_core::config::CoordinatorConfig;
use maci_core::state::{CapacityError, MaciState};
use maci_crypto::field::rand_field;
use maci_crypto::keys::Keypair;
use num_bigint::BigUint;
use rand::SeedableRng;
use rand::rngs::StdRng;

use common::{INITIAL_BALANCE, fresh_state, publish_signed, vote_command};

#[test]
fn single_valid_vote_is_applied() {
    let mut rng = StdRng::seed_from_u64(101);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    let state_index = state
        .sign_up(voter.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");
    assert_eq!(state_index, 1);

    let command = vote_command(1, voter.pub_key, 2, 5, 1, &mut rng);
    let index = publish_signed(&mut state, &voter, &command, &mut rng);
    state.process_message(index).expect("index is in range");

    let user = &state.users()[0];
    assert_eq!(user.votes[2], Fr::from(5_u64));
    assert_eq!(user.voice_credit_balance, Fr::from(75_u64));
    assert_eq!(user.nonce, Fr::from(1_u64));
}

#[test]
fn wrong_nonce_is_rejected() {
    let mut rng = StdRng::seed_from_u64(102);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    state
        .sign_up(voter.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");

    // First command must carry nonce 1; this one claims 2.
    let command = vote_command(1, voter.pub_key, 2, 5, 2, &mut rng);
    let index = publish_signed(&mut state, &voter, &command, &mut rng);
    let before = state.users().to_vec();
    state.process_message(index).expect("index is in range");

    assert_eq!(state.users(), before.as_slice());
    assert_eq!(state.messages().len(), 1);
}

#[test]
fn overdraw_is_rejected() {
    let mut rng = StdRng::seed_from_u64(103);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    // Weight 5 costs 25 credits; the user only has 16.
    state.sign_up(voter.pub_key, 16).expect("state tree has room");

    let command = vote_command(1, voter.pub_key, 2, 5, 1, &mut rng);
    let index = publish_signed(&mut state, &voter, &command, &mut rng);
    let before = state.users().to_vec();
    state.process_message(index).expect("index is in range");

    assert_eq!(state.users(), before.as_slice());
}

#[test]
fn exact_balance_spend_is_accepted() {
    let mut rng = StdRng::seed_from_u64(104);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    state.sign_up(voter.pub_key, 25).expect("state tree has room");

    let command = vote_command(1, voter.pub_key, 0, 5, 1, &mut rng);
    let index = publish_signed(&mut state, &voter, &command, &mut rng);
    state.process_message(index).expect("index is in range");

    let user = &state.users()[0];
    assert_eq!(user.votes[0], Fr::from(5_u64));
    assert_eq!(user.voice_credit_balance, Fr::from(0_u64));
}

#[test]
fn revoting_refunds_the_previous_weight() {
    let mut rng = StdRng::seed_from_u64(105);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    state
        .sign_up(voter.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");

    let first = vote_command(1, voter.pub_key, 1, 9, 1, &mut rng);
    let index = publish_signed(&mut state, &voter, &first, &mut rng);
    state.process_message(index).expect("index is in range");
    assert_eq!(
        state.users()[0].voice_credit_balance,
        Fr::from(INITIAL_BALANCE - 81)
    );

    // Moving the same option from weight 9 to 6 refunds 81 and charges 36.
    let second = vote_command(1, voter.pub_key, 1, 6, 2, &mut rng);
    let index = publish_signed(&mut state, &voter, &second, &mut rng);
    state.process_message(index).expect("index is in range");

    let user = &state.users()[0];
    assert_eq!(user.votes[1], Fr::from(6_u64));
    assert_eq!(user.voice_credit_balance, Fr::from(INITIAL_BALANCE - 36));
    assert_eq!(user.nonce, Fr::from(2_u64));
}

#[test]
fn vote_option_out_of_bounds_is_rejected() {
    let mut rng = StdRng::seed_from_u64(106);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    state
        .sign_up(voter.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");

    // maxVoteOptionIndex is 3.
    let command = vote_command(1, voter.pub_key, 4, 1, 1, &mut rng);
    let index = publish_signed(&mut state, &voter, &command, &mut rng);
    let before = state.users().to_vec();
    state.process_message(index).expect("index is in range");
    assert_eq!(state.users(), before.as_slice());
}

#[test]
fn state_index_bounds_are_enforced() {
    let mut rng = StdRng::seed_from_u64(107);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    state
        .sign_up(voter.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");

    // Index 0 is reserved and index 2 addresses nobody.
    for bad_index in [0_u64, 2] {
        let command = vote_command(bad_index, voter.pub_key, 1, 1, 1, &mut rng);
        let index = publish_signed(&mut state, &voter, &command, &mut rng);
        let before = state.users().to_vec();
        state.process_message(index).expect("index is in range");
        assert_eq!(state.users(), before.as_slice());
    }
}

#[test]
fn signature_by_somebody_else_is_rejected() {
    let mut rng = StdRng::seed_from_u64(108);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    let imposter = Keypair::generate(&mut rng);
    state
        .sign_up(voter.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");

    let command = vote_command(1, voter.pub_key, 1, 2, 1, &mut rng);
    let index = publish_signed(&mut state, &imposter, &command, &mut rng);
    let before = state.users().to_vec();
    state.process_message(index).expect("index is in range");
    assert_eq!(state.users(), before.as_slice());
}

#[test]
fn key_rotation_takes_effect_from_the_next_message() {
    let mut rng = StdRng::seed_from_u64(109);
    let mut state = fresh_state(&mut rng);
    let old_key = Keypair::generate(&mut rng);
    let new_key = Keypair::generate(&mut rng);
    state
        .sign_up(old_key.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");

    // Rotate: signed by the old key, rotating to the new one.
    let rotate = vote_command(1, new_key.pub_key, 0, 1, 1, &mut rng);
    let index = publish_signed(&mut state, &old_key, &rotate, &mut rng);
    state.process_message(index).expect("index is in range");
    assert_eq!(state.users()[0].pub_key, new_key.pub_key);

    // The old key no longer signs for this slot.
    let stale = vote_command(1, new_key.pub_key, 1, 2, 2, &mut rng);
    let index = publish_signed(&mut state, &old_key, &stale, &mut rng);
    state.process_message(index).expect("index is in range");
    assert_eq!(state.users()[0].nonce, Fr::from(1_u64));

    // The rotated key does.
    let fresh = vote_command(1, new_key.pub_key, 1, 2, 2, &mut rng);
    let index = publish_signed(&mut state, &new_key, &fresh, &mut rng);
    state.process_message(index).expect("index is in range");
    assert_eq!(state.users()[0].nonce, Fr::from(2_u64));
    assert_eq!(state.users()[0].votes[1], Fr::from(2_u64));
}

#[test]
fn undecryptable_messages_leave_the_state_unchanged() {
    let mut rng = StdRng::seed_from_u64(110);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    state
        .sign_up(voter.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");

    // Ten random field elements under a random ephemeral key: the
    // coordinator decrypts garbage.
    let message = Message {
        iv: rand_field(&mut rng),
        data: core::array::from_fn(|_| rand_field(&mut rng)),
    };
    let ephemeral = Keypair::generate(&mut rng);
    state
        .publish_message(message, ephemeral.pub_key)
        .expect("message tree has room");

    let before = state.users().to_vec();
    state.process_message(0).expect("index is in range");
    assert_eq!(state.users(), before.as_slice());
    assert_eq!(state.messages().len(), 1);
    assert_eq!(state.enc_pub_keys().len(), 1);
}

#[test]
fn invalid_ephemeral_key_is_tolerated() {
    let mut rng = StdRng::seed_from_u64(111);
    let mut state = fresh_state(&mut rng);
    let voter = Keypair::generate(&mut rng);
    state
        .sign_up(voter.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");

    let command = vote_command(1, voter.pub_key, 1, 1, 1, &mut rng);
    let signature = command.sign(&voter);
    let message = command.encrypt(&signature, rand_field(&mut rng), &mut rng);
    // Not a curve point: ECDH is impossible, the message must still be
    // recorded and must process to a no-op.
    let bogus_key = maci_crypto::keys::PubKey {
        x: rand_field(&mut rng),
        y: rand_field(&mut rng),
    };
    state
        .publish_message(message, bogus_key)
        .expect("message tree has room");

    let before = state.users().to_vec();
    state.process_message(0).expect("index is in range");
    assert_eq!(state.users(), before.as_slice());
}

#[test]
fn nonce_counts_accepted_commands_and_credits_are_conserved() {
    let mut rng = StdRng::seed_from_u64(112);
    let mut state = fresh_state(&mut rng);
    let voters: Vec<Keypair> = (0..3).map(|_| Keypair::generate(&mut rng)).collect();
    for voter in &voters {
        state
            .sign_up(voter.pub_key, INITIAL_BALANCE)
            .expect("state tree has room");
    }

    // A mix of valid and invalid commands per user.
    let schedule = [
        (1_u64, 0_u64, 3_u64, 1_u64, true),
        (1, 1, 4, 2, true),
        (1, 1, 4, 2, false), // replayed nonce
        (2, 3, 9, 1, true),
        (2, 0, 50, 2, false), // overdraw: 2500 > 100 - 81
        (3, 2, 10, 1, true),
        (3, 2, 1, 3, false), // skipped nonce
    ];
    let mut accepted = [0_u64; 3];
    for (state_index, option, weight, nonce, valid) in schedule {
        let voter = &voters[usize::try_from(state_index).expect("small index") - 1];
        let command = vote_command(state_index, voter.pub_key, option, weight, nonce, &mut rng);
        let index = publish_signed(&mut state, voter, &command, &mut rng);
        state.process_message(index).expect("index is in range");
        if valid {
            accepted[usize::try_from(state_index).expect("small index") - 1] += 1;
        }
    }

    for (user, accepted_count) in state.users().iter().zip(accepted) {
        assert_eq!(user.nonce, Fr::from(accepted_count));
        let spent: BigUint = user
            .votes
            .iter()
            .map(|vote| {
                let weight: BigUint = (*vote).into();
                &weight * &weight
            })
            .sum();
        let balance: BigUint = user.voice_credit_balance.into();
        assert_eq!(spent + balance, BigUint::from(INITIAL_BALANCE));
    }
}

#[test]
fn process_message_rejects_out_of_range_indices() {
    let mut rng = StdRng::seed_from_u64(113);
    let mut state = fresh_state(&mut rng);
    let error = state.process_message(0).expect_err("no messages yet");
    assert_eq!(error.index, 0);
    assert_eq!(error.count, 0);
}

#[test]
fn sign_up_stops_at_capacity() {
    let mut rng = StdRng::seed_from_u64(114);
    // Depth 2 state tree: 4 slots, one reserved, so 3 users.
    let config = CoordinatorConfig::new(2, 2, 2, 4, 4, 3, INITIAL_BALANCE).expect("valid config");
    let mut state = MaciState::new(config, Keypair::generate(&mut rng));
    for expected_index in 1..=3 {
        let keypair = Keypair::generate(&mut rng);
        assert_eq!(
            state.sign_up(keypair.pub_key, INITIAL_BALANCE),
            Ok(expected_index)
        );
    }
    let keypair = Keypair::generate(&mut rng);
    assert_eq!(
        state.sign_up(keypair.pub_key, INITIAL_BALANCE),
        Err(CapacityError::StateTreeFull { max_users: 3 })
    );
}

#[test]
fn publish_stops_at_capacity() {
    let mut rng = StdRng::seed_from_u64(115);
    // Depth 2 message tree: 4 slots.
    let config = CoordinatorConfig::new(4, 2, 2, 4, 4, 3, INITIAL_BALANCE).expect("valid config");
    let mut state = MaciState::new(config, Keypair::generate(&mut rng));
    let voter = Keypair::generate(&mut rng);
    state
        .sign_up(voter.pub_key, INITIAL_BALANCE)
        .expect("state tree has room");
    for nonce in 1..=4 {
        let command = vote_command(1, voter.pub_key, 0, 1, nonce, &mut rng);
        publish_signed(&mut state, &voter, &command, &mut rng);
    }
    let command = vote_command(1, voter.pub_key, 0, 1, 5, &mut rng);
    let signature = command.sign(&voter);
    let ephemeral = Keypair::generate(&mut rng);
    let message = command.encrypt(&signature, rand_field(&mut rng), &mut rng);
    assert_eq!(
        state.publish_message(message, ephemeral.pub_key),
        Err(CapacityError::MessageTreeFull { max_messages: 4 })
    );
}
