//! ACL wire format and parallel content summarization.
