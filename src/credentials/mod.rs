pub mod aws_chain;
pub mod gcp_token;
pub mod sigv4;

pub use aws_chain::AwsCredentialSource;
pub use gcp_token::TokenSource;
pub use sigv4::AwsCredentials;
