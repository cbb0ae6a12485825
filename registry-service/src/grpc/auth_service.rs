//! gRPC implementation of AuthService.

use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

use crate::grpc::proto::{
    auth_service_server::AuthService, LoginRequest, LoginResponse, RegisterRequest,
    RegisterResponse, TokenClaims as ProtoTokenClaims, ValidateTokenRequest,
    ValidateTokenResponse,
};
use crate::grpc::wire::{observe, service_error, WirePolicy};
use crate::models::NewUser;
use crate::services::{CredentialStore, TokenClaims, TokenIssuer};

pub struct AuthServiceImpl {
    credentials: Arc<CredentialStore>,
    tokens: Arc<TokenIssuer>,
    wire: WirePolicy,
}

impl AuthServiceImpl {
    pub fn new(
        credentials: Arc<CredentialStore>,
        tokens: Arc<TokenIssuer>,
        wire: WirePolicy,
    ) -> Self {
        Self {
            credentials,
            tokens,
            wire,
        }
    }

    async fn login_impl(&self, req: LoginRequest) -> Result<LoginResponse, Status> {
        let user = self
            .credentials
            .authenticate(&req.email, &req.password)
            .await
            .map_err(|e| self.wire.login_error(e))?;

        let token = self
            .tokens
            .issue(&user)
            .map_err(|e| self.wire.login_error(e.into()))?;

        tracing::info!(user_id = %user.user_id, "Issued bearer token");

        Ok(LoginResponse {
            token,
            expires_in: self.tokens.expires_in_seconds(),
        })
    }
}

impl From<TokenClaims> for ProtoTokenClaims {
    fn from(claims: TokenClaims) -> Self {
        Self {
            user_id: claims.sub,
            issuer: claims.iss,
            audience: claims.aud,
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let started = Instant::now();
        let result = self.login_impl(request.into_inner()).await;
        observe("Login", started, &result);
        result.map(Response::new)
    }

    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let started = Instant::now();
        let req = request.into_inner();

        let result = self
            .credentials
            .create_user(NewUser {
                full_name: req.full_name,
                public_email: req.public_email,
                private_email: req.private_email,
                password: req.password,
                password_confirmation: req.password_confirmation,
            })
            .await
            .map(|user| RegisterResponse {
                user_id: user.user_id.to_string(),
            })
            .map_err(|e| service_error("Register", e));

        observe("Register", started, &result);
        result.map(Response::new)
    }

    async fn validate_token(
        &self,
        request: Request<ValidateTokenRequest>,
    ) -> Result<Response<ValidateTokenResponse>, Status> {
        let started = Instant::now();
        let req = request.into_inner();

        let response = match self.tokens.validate(&req.token) {
            Ok(claims) => ValidateTokenResponse {
                valid: true,
                claims: Some(claims.into()),
            },
            Err(e) => {
                tracing::debug!(error = %e, "Token rejected");
                ValidateTokenResponse {
                    valid: false,
                    claims: None,
                }
            }
        };

        let result = Ok(response);
        observe("ValidateToken", started, &result);
        result.map(Response::new)
    }
}
