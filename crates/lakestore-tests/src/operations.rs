//! Metadata operations, enumeration, and engine retry behavior.
