//! Well-known error condition symbols.

/// Condition strings raised by this implementation or recognised from
/// peers. Any other symbol received from a peer is carried verbatim.
pub mod conditions {
    /// The connection was closed by an operator or policy.
    pub const CONNECTION_FORCED: &str = "amqp:connection:forced";
    /// A framing or codec violation on the connection.
    pub const FRAMING_ERROR: &str = "amqp:connection:framing-error";
    /// The link was detached by force.
    pub const DETACH_FORCED: &str = "amqp:link:detach-forced";
    /// More transfers were sent than the link credit allowed.
    pub const TRANSFER_LIMIT_EXCEEDED: &str = "amqp:link:transfer-limit-exceeded";
    /// A message exceeded the link's maximum message size.
    pub const MESSAGE_SIZE_EXCEEDED: &str = "amqp:link:message-size-exceeded";
    /// A transfer violated the session window.
    pub const WINDOW_VIOLATION: &str = "amqp:session:window-violation";
    /// The peer requested functionality this implementation lacks.
    pub const NOT_IMPLEMENTED: &str = "amqp:not-implemented";
}
