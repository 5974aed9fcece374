//! Numeric replies the engine can queue for local clients.
//!
//! Numeric registration itself lives with the client layer; the engine
//! only needs the handful of replies its own policies can trigger.

use meshirc_proto::Message;

/// ERR_NOSUCHNICK (401).
pub fn no_such_nick(server: &str, nick: &str, target: &str) -> Message {
    Message::new(
        Some(server),
        "401",
        [nick, target, "No such nick/channel"],
    )
}

/// ERR_USERNOTINCHANNEL (441).
pub fn user_not_in_channel(server: &str, nick: &str, target: &str, channel: &str) -> Message {
    Message::new(
        Some(server),
        "441",
        [nick, target, channel, "They aren't on that channel"],
    )
}

/// ERR_CHANOPRIVSNEEDED (482).
pub fn chanop_privs_needed(server: &str, nick: &str, channel: &str) -> Message {
    Message::new(
        Some(server),
        "482",
        [nick, channel, "You're not a channel operator"],
    )
}

/// A custom no-privileges reply produced by a mode block.
pub fn custom_no_privs(server: &str, nick: &str, channel: &str, text: &str) -> Message {
    Message::new(Some(server), "482", [nick, channel, text])
}

/// RPL_NAMREPLY (353).
pub fn name_reply(server: &str, nick: &str, channel: &str, names: &str) -> Message {
    Message::new(Some(server), "353", [nick, "=", channel, names])
}

/// RPL_ENDOFNAMES (366).
pub fn end_of_names(server: &str, nick: &str, channel: &str) -> Message {
    Message::new(
        Some(server),
        "366",
        [nick, channel, "End of /NAMES list"],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numerics_serialize_with_server_prefix() {
        let msg = chanop_privs_needed("hub.test", "ann", "#ops");
        assert_eq!(
            msg.to_string(),
            ":hub.test 482 ann #ops :You're not a channel operator"
        );
    }
}
