//! Events emitted by the IRC client for the bot layer to consume.

/// Events that the client emits to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// TCP (and TLS) is up; registration has been sent.
    Connected,

    /// IRC registration complete (001). `nick` is our confirmed nick.
    Registered {
        nick: String,
    },

    /// End of the login sequence: RPL_ENDOFMOTD (376) or ERR_NOMOTD (422).
    /// Channel operations are valid from here on.
    MotdEnd,

    /// Someone (possibly us) joined a channel.
    Joined {
        channel: String,
        nick: String,
    },

    /// A PRIVMSG to a channel or to us. `text` is the undecoded wire payload.
    Message {
        from: String,
        target: String,
        text: Vec<u8>,
    },

    /// A user changed nick.
    NickChanged {
        old_nick: String,
        new_nick: String,
    },

    /// Server NOTICE, ERROR or error numeric.
    ServerNotice {
        text: String,
    },

    /// Connection was closed.
    Disconnected {
        reason: String,
    },
}
