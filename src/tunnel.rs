//! Bidirectional byte copy between two async streams.
//!
//! Grounded on the `tokio::select!` shape of
//! `warpgate-protocol-ssh/src/client/channel_direct_tcpip.rs`'s forwarding loop: whichever
//! direction finishes first (EOF or error) ends the tunnel, and both sides are shut down exactly
//! once on the way out.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const DEFAULT_BUF_SIZE: usize = 32 * 1024;

/// Copies bytes in both directions between `a` and `b` until either side reaches EOF or a read/
/// write fails. Returns the first non-EOF error encountered, if any; both streams are shut down
/// before returning, regardless of outcome.
pub async fn tunnel<A, B>(a: A, b: B) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    tunnel_with_buffers(a, b, DEFAULT_BUF_SIZE, DEFAULT_BUF_SIZE).await
}

/// As [`tunnel`], but with explicit per-direction buffer sizes (e.g. when buffers are leased from
/// a pool rather than allocated fresh per call).
pub async fn tunnel_with_buffers<A, B>(
    mut a: A,
    mut b: B,
    buf_a_to_b: usize,
    buf_b_to_a: usize,
) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ar, mut aw) = tokio::io::split(&mut a);
    let (mut br, mut bw) = tokio::io::split(&mut b);

    let a_to_b = copy_loop(&mut ar, &mut bw, buf_a_to_b);
    let b_to_a = copy_loop(&mut br, &mut aw, buf_b_to_a);

    let result = tokio::select! {
        res = a_to_b => res,
        res = b_to_a => res,
    };

    let _ = a.shutdown().await;
    let _ = b.shutdown().await;

    result
}

async fn copy_loop<R, W>(reader: &mut R, writer: &mut W, buf_size: usize) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buf_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn copies_bytes_until_eof() {
        let (mut client_a, server_a) = duplex(64);
        let (mut client_b, server_b) = duplex(64);

        let handle = tokio::spawn(tunnel(server_a, server_b));

        client_a.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        client_b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        client_b.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 5];
        client_a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(client_a);
        drop(client_b);

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closing_one_side_ends_the_tunnel() {
        let (client_a, server_a) = duplex(64);
        let (_client_b, server_b) = duplex(64);

        let handle = tokio::spawn(tunnel(server_a, server_b));
        drop(client_a);

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("tunnel should end promptly once a side closes");
        result.unwrap().unwrap();
    }
}
