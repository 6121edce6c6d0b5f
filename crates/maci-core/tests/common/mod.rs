//! Shared fixtures for the integration suites.

use ark_bn254::Fr;
use maci_core::command::Command;
use maci_core::config::CoordinatorConfig;
use maci_core::state::MaciState;
use maci_crypto::field::rand_field;
use maci_crypto::keys::{Keypair, PubKey, ecdh_shared_key};
use rand::rngs::StdRng;

/// Balance granted to every test user unless a scenario says otherwise.
pub const INITIAL_BALANCE: u64 = 100;

/// The small configuration the concrete scenarios run against:
/// `stateTreeDepth = 4`, `messageTreeDepth = 4`, `voteOptionTreeDepth = 2`,
/// both batch sizes 4, `maxVoteOptionIndex = 3`.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::new(4, 4, 2, 4, 4, 3, INITIAL_BALANCE).expect("valid test config")
}

/// An empty engine with a fresh coordinator keypair.
pub fn fresh_state(rng: &mut StdRng) -> MaciState {
    MaciState::new(test_config(), Keypair::generate(rng))
}

/// A vote command with a random salt.
pub fn vote_command(
    state_index: u64,
    new_pub_key: PubKey,
    option: u64,
    weight: u64,
    nonce: u64,
    rng: &mut StdRng,
) -> Command {
    Command {
        state_index: Fr::from(state_index),
        new_pub_key,
        vote_option_index: Fr::from(option),
        new_vote_weight: Fr::from(weight),
        nonce: Fr::from(nonce),
        salt: rand_field(rng),
    }
}

/// Sign with `signer`, encrypt under a fresh ephemeral ECDH key for the
/// coordinator, and publish. Returns the message index.
pub fn publish_signed(
    state: &mut MaciState,
    signer: &Keypair,
    command: &Command,
    rng: &mut StdRng,
) -> usize {
    let signature = command.sign(signer);
    let ephemeral = Keypair::generate(rng);
    let shared_key = ecdh_shared_key(&ephemeral.priv_key, &state.coordinator().pub_key)
        .expect("coordinator key is valid");
    let message = command.encrypt(&signature, shared_key, rng);
    state
        .publish_message(message, ephemeral.pub_key)
        .expect("message tree has room");
    state.messages().len() - 1
}
