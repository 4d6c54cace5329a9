mod certificate;
mod position;

pub use certificate::CertificateRepository;
pub use position::PositionRepository;
