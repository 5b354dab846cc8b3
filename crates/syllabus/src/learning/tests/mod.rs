mod common;
mod completion;
mod credentials;
