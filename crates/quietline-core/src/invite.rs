//! First-contact chat invitations.
//!
//! The initiator encapsulates the starting chat key against the peer's KEM
//! key and seals the chat coordinates (sender, inbox, starting serial and a
//! signature over the inbox code) under a subkey of it. The relay stores the
//! result as an opaque notification for the recipient.

use quietline_crypto::{
    ChatKey, KemKeyPair, NOTIFICATION_LABEL, derive_subkey, encapsulate, open, seal,
};
use quietline_proto::{ChatNotification, InboxId, payloads::relay::NotifyInbox};

use crate::{
    env::Environment,
    error::ChatError,
    identity::{LocalIdentity, PeerIdentity},
};

/// A sealed invitation and the starting key it carries.
#[derive(Debug)]
pub struct Invite {
    /// Notification to hand to the relay
    pub notify: NotifyInbox,
    /// Key for `serial_start`
    pub starting_key: ChatKey,
}

/// Build an invitation for `peer` to the chat at `inbox_id`.
///
/// # Errors
///
/// - `BadFormat` if encapsulation against the peer's key fails
pub fn seal_invite<E: Environment>(
    env: &E,
    local: &LocalIdentity,
    peer: &PeerIdentity,
    inbox_id: InboxId,
    serial_start: u64,
) -> Result<Invite, ChatError> {
    let (kem_ciphertext, starting_key) = encapsulate(peer.kem_key(), env.random_array())?;
    let wrap = derive_subkey(starting_key.as_bytes(), NOTIFICATION_LABEL);

    let signature = local.sign(inbox_id.as_bytes());

    let notify = NotifyInbox {
        recipient: peer.username().to_string(),
        enc_sender: seal(&wrap, local.username().as_bytes(), env.random_array()),
        enc_inbox_code: seal(&wrap, inbox_id.as_bytes(), env.random_array()),
        enc_signature: seal(&wrap, &signature, env.random_array()),
        enc_serial: seal(&wrap, &serial_start.to_be_bytes(), env.random_array()),
        kem_ciphertext,
    };

    Ok(Invite { notify, starting_key })
}

/// An opened but not yet verified invitation.
#[derive(Debug)]
pub struct OpenedInvite {
    /// Claimed initiator
    pub sender: String,
    /// Chat inbox
    pub inbox_id: InboxId,
    /// Starting serial
    pub serial_start: u64,
    /// Key for `serial_start`
    pub starting_key: ChatKey,
    signature: Vec<u8>,
}

impl OpenedInvite {
    /// Check the signature against the resolved identity of `sender`.
    ///
    /// # Errors
    ///
    /// - `AuthFailure` if `identity` belongs to another user or the signature
    ///   does not verify
    pub fn verify(&self, identity: &PeerIdentity) -> Result<(), ChatError> {
        if identity.username() != self.sender {
            return Err(ChatError::AuthFailure(format!(
                "invite claims sender {} but identity is {}",
                self.sender,
                identity.username()
            )));
        }

        identity.verify(self.inbox_id.as_bytes(), &self.signature)
    }
}

/// Decapsulate and open a notification addressed to `local_kem`.
///
/// # Errors
///
/// - `DesyncOrCorruption` if any field fails authentication
/// - `BadFormat` if a field has the wrong shape
pub fn open_invite(
    notification: &ChatNotification,
    local_kem: &KemKeyPair,
) -> Result<OpenedInvite, ChatError> {
    let starting_key = local_kem.decapsulate(&notification.kem_ciphertext)?;
    let wrap = derive_subkey(starting_key.as_bytes(), NOTIFICATION_LABEL);

    let sender = String::from_utf8(open(&wrap, &notification.enc_sender)?)
        .map_err(|_| ChatError::BadFormat("sender is not UTF-8".to_string()))?;

    let inbox_bytes = open(&wrap, &notification.enc_inbox_code)?;
    let inbox_id = InboxId::from_slice(&inbox_bytes)
        .ok_or_else(|| ChatError::BadFormat(format!("inbox code is {} bytes", inbox_bytes.len())))?;

    let serial_bytes: [u8; 8] = open(&wrap, &notification.enc_serial)?
        .as_slice()
        .try_into()
        .map_err(|_| ChatError::BadFormat("serial is not 8 bytes".to_string()))?;

    let signature = open(&wrap, &notification.enc_signature)?;

    Ok(OpenedInvite {
        sender,
        inbox_id,
        serial_start: u64::from_be_bytes(serial_bytes),
        starting_key,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use quietline_crypto::IdentityKeys;

    use super::*;
    use crate::testing::SeededEnv;

    fn identities() -> (LocalIdentity, LocalIdentity) {
        (
            LocalIdentity::new("alice", IdentityKeys::from_seeds([1; 32], [2; 32])),
            LocalIdentity::new("bob", IdentityKeys::from_seeds([3; 32], [4; 32])),
        )
    }

    #[test]
    fn invite_round_trip() {
        let env = SeededEnv::new(1);
        let (alice, bob) = identities();
        let bob_peer = PeerIdentity::from_public("bob", &bob.public()).unwrap();
        let alice_peer = PeerIdentity::from_public("alice", &alice.public()).unwrap();

        let invite = seal_invite(&env, &alice, &bob_peer, InboxId([8; 32]), 4242).unwrap();
        assert_eq!(invite.notify.recipient, "bob");

        let opened = open_invite(&invite.notify.clone().into(), bob.kem()).unwrap();
        assert_eq!(opened.sender, "alice");
        assert_eq!(opened.inbox_id, InboxId([8; 32]));
        assert_eq!(opened.serial_start, 4242);
        assert_eq!(opened.starting_key, invite.starting_key);
        assert!(opened.verify(&alice_peer).is_ok());
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let env = SeededEnv::new(2);
        let (alice, bob) = identities();
        let bob_peer = PeerIdentity::from_public("bob", &bob.public()).unwrap();

        let invite = seal_invite(&env, &alice, &bob_peer, InboxId([8; 32]), 1).unwrap();

        let result = open_invite(&invite.notify.into(), alice.kem());
        assert!(matches!(result, Err(ChatError::DesyncOrCorruption(_))));
    }

    #[test]
    fn impersonated_sender_fails_verification() {
        let env = SeededEnv::new(3);
        let (alice, bob) = identities();
        let mallory = LocalIdentity::new("alice", IdentityKeys::from_seeds([6; 32], [6; 32]));
        let bob_peer = PeerIdentity::from_public("bob", &bob.public()).unwrap();
        let alice_peer = PeerIdentity::from_public("alice", &alice.public()).unwrap();

        // Mallory claims to be alice but signs with her own key
        let invite = seal_invite(&env, &mallory, &bob_peer, InboxId([8; 32]), 1).unwrap();
        let opened = open_invite(&invite.notify.into(), bob.kem()).unwrap();

        assert!(matches!(opened.verify(&alice_peer), Err(ChatError::AuthFailure(_))));
    }

    #[test]
    fn identity_for_other_user_rejected() {
        let env = SeededEnv::new(4);
        let (alice, bob) = identities();
        let bob_peer = PeerIdentity::from_public("bob", &bob.public()).unwrap();

        let invite = seal_invite(&env, &alice, &bob_peer, InboxId([8; 32]), 1).unwrap();
        let opened = open_invite(&invite.notify.into(), bob.kem()).unwrap();

        assert!(matches!(opened.verify(&bob_peer), Err(ChatError::AuthFailure(_))));
    }
}
