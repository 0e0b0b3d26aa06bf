//! Ladder diagram projection.

use crate::types::{DialogRecord, LadderStep, Role};

/// Project a dialog onto A/B/Proxy lifelines.
///
/// The first message's source is `A` and its destination `B`; any other
/// address is `Proxy`. One step per message, in order.
pub fn build_ladder(dialog: &DialogRecord) -> Vec<LadderStep> {
    let Some(first) = dialog.messages.first() else {
        return Vec::new();
    };
    let (a, b) = (first.source_addr.as_str(), first.dest_addr.as_str());

    let role = |addr: &str| {
        if addr == a {
            Role::A
        } else if addr == b {
            Role::B
        } else {
            Role::Proxy
        }
    };

    dialog
        .messages
        .iter()
        .map(|m| LadderStep {
            from: role(&m.source_addr),
            to: role(&m.dest_addr),
            label: m.label(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DialogMessage;

    fn msg(src: &str, dst: &str, method: Option<&str>, code: Option<u16>) -> DialogMessage {
        DialogMessage {
            ts: None,
            source_addr: src.to_string(),
            dest_addr: dst.to_string(),
            method: method.map(String::from),
            status_code: code,
            cseq_method: None,
        }
    }

    #[test]
    fn test_two_party_ladder() {
        let mut dialog = DialogRecord::new("c1");
        dialog.messages = vec![
            msg("10.0.0.1", "10.0.0.2", Some("INVITE"), None),
            msg("10.0.0.2", "10.0.0.1", None, Some(200)),
            msg("10.0.0.1", "10.0.0.2", Some("ACK"), None),
        ];

        let steps = build_ladder(&dialog);
        assert_eq!(
            steps,
            vec![
                LadderStep { from: Role::A, to: Role::B, label: "INVITE".to_string() },
                LadderStep { from: Role::B, to: Role::A, label: "200".to_string() },
                LadderStep { from: Role::A, to: Role::B, label: "ACK".to_string() },
            ]
        );
    }

    #[test]
    fn test_third_address_is_proxy() {
        let mut dialog = DialogRecord::new("c2");
        dialog.messages = vec![
            msg("10.0.0.1", "10.0.0.5", Some("INVITE"), None),
            msg("10.0.0.5", "10.0.0.9", Some("INVITE"), None),
            msg("10.0.0.9", "10.0.0.5", None, None),
        ];

        let steps = build_ladder(&dialog);
        assert_eq!((steps[1].from, steps[1].to), (Role::B, Role::Proxy));
        assert_eq!((steps[2].from, steps[2].to), (Role::Proxy, Role::B));
        assert_eq!(steps[2].label, "?");
    }

    #[test]
    fn test_empty_dialog() {
        assert!(build_ladder(&DialogRecord::new("c3")).is_empty());
    }
}
